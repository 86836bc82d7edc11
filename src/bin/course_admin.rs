use std::path::PathBuf;

use clap::Parser;
use course_server::{
    course::{self, category, duration::recompute_all},
    db,
    user::{self, NewUser, Role},
    utils::init_log,
};

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "database/course.db")]
    database: PathBuf,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Course {
        #[command(subcommand)]
        command: CourseCommand,
    },
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
}

#[derive(Debug, clap::Subcommand)]
enum UserCommand {
    List,
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        instructor: bool,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, clap::Subcommand)]
enum CourseCommand {
    List,
    Show { id: i64 },
    /// Rebuild every course duration from its lessons
    RecomputeDurations,
}

#[derive(Debug, clap::Subcommand)]
enum CategoryCommand {
    List,
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_log(None)?;
    let args = Args::parse();
    let database = db::connect(&args.database).await?;

    match args.command {
        Commands::User { command } => match command {
            UserCommand::List => {
                for user in user::get_user_list(&database).await? {
                    println!(
                        "{:<6} {:<12} {:<30} {}",
                        user.id,
                        format!("{:?}", user.role),
                        user.email,
                        user.name
                    );
                }
            }
            UserCommand::Create {
                name,
                email,
                password,
                instructor,
            } => {
                let role = if instructor {
                    Role::Instructor
                } else {
                    Role::Student
                };
                let new_user = NewUser {
                    name,
                    email,
                    password,
                    role,
                };
                let id = user::create_user(&database, new_user).await?;
                println!("{:?} created with id: {}", role, id);
            }
            UserCommand::Delete { id } => {
                user::delete_user(&database, id).await?;
                println!("User deleted with id: {}", id);
            }
        },
        Commands::Course { command } => match command {
            CourseCommand::List => {
                for c in course::list_courses(&database, None).await? {
                    println!(
                        "{:<6} {:<40} {:<20} lessons: {:<4} students: {}",
                        c.course.id, c.course.title, c.instructor_name, c.lesson_count, c.enrollment_count
                    );
                }
            }
            CourseCommand::Show { id } => {
                let detail = course::get_course(&database, id).await?;
                println!("{}", serde_json::to_string_pretty(&detail)?);
            }
            CourseCommand::RecomputeDurations => {
                let count = recompute_all(&database).await?;
                println!("Recomputed duration of {} courses", count);
            }
        },
        Commands::Category { command } => match command {
            CategoryCommand::List => {
                for c in category::list_categories(&database).await? {
                    println!("{:<6} {}", c.id, c.name);
                }
            }
            CategoryCommand::Create { name, description } => {
                let id = category::create_category(&database, &name, description.as_deref()).await?;
                println!("Category created with id: {}", id);
            }
        },
    }
    Ok(())
}
