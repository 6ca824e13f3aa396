use clap::Subcommand;
use serde_json::json;

use crate::cli::config::build_app;
use crate::cli::utils::{output_empty_collection, output_gallery, output_success};
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::types::{DocumentId, NewProject};

#[derive(Subcommand)]
pub enum ProjectCommands {
    #[command(about = "List every project in the collection")]
    List,

    #[command(about = "Publish a project (requires sign-in)")]
    Add {
        #[arg(long, help = "Project title")]
        title: String,
        #[arg(long, help = "Technologies, comma separated")]
        tech: String,
        #[arg(long, help = "Project URL (http or https)")]
        link: String,
        #[arg(long, help = "Short description")]
        description: String,
    },

    #[command(about = "Delete one of your projects (requires sign-in)")]
    Delete {
        #[arg(help = "Project ID")]
        id: String,
    },
}

pub async fn handle(cmd: ProjectCommands, output_format: &OutputFormat, config: &AppConfig) -> anyhow::Result<()> {
    let app = build_app(config).await?;
    app.load().await;

    match cmd {
        ProjectCommands::List => {
            if let Some(e) = app.take_error() {
                return Err(AppError::from(e).into());
            }

            let cards = app.gallery();
            if cards.is_empty() {
                return output_empty_collection(output_format, "projects", "No projects published yet");
            }
            output_gallery(output_format, &cards)
        }
        ProjectCommands::Add { title, tech, link, description } => {
            let payload = NewProject { title, description, link, tech };
            let item = app.add_project(&payload).await.map_err(AppError::from)?;
            output_success(
                output_format,
                &format!("Published '{}' ({})", item.data.title, item.id),
                Some(json!({ "project": item })),
            )
        }
        ProjectCommands::Delete { id } => {
            let id = DocumentId::from(id);
            app.delete_project(&id).await.map_err(AppError::from)?;
            output_success(
                output_format,
                &format!("Deleted project {}", id),
                Some(json!({ "id": id })),
            )
        }
    }
}
