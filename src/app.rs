use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data::{self, CommentService, FeedService, InteractionService, UserService};
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let user_agent = if !cfg.api.user_agent.trim().is_empty() {
        cfg.api.user_agent.clone()
    } else {
        format!("fotolenta/{}", crate::VERSION)
    };

    let mut feed_service: Option<Arc<dyn data::FeedService>> = None;
    let mut comment_service: Option<Arc<dyn data::CommentService>> = None;
    let mut interaction_service: Option<Arc<dyn data::InteractionService>> = None;
    let mut user_service: Option<Arc<dyn data::UserService>> = None;
    let mut viewer: Option<api::User> = None;
    let status: String;

    match api::Client::new(api::ClientConfig {
        user_agent,
        base_url: Some(cfg.api.base_url.clone()),
        init_data: cfg.api.init_data.clone(),
        user_id: cfg.api.user_id,
        timeout: Some(cfg.api.timeout),
        http_client: None,
    }) {
        Ok(client) => {
            let client = Arc::new(client);

            // The viewer identity gates self-profile handling; the app still
            // works read-only when the init payload is missing or rejected.
            viewer = client.me().ok();

            let feed_api: Arc<dyn FeedService> =
                Arc::new(data::ApiFeedService::new(client.clone()));
            let comment_api: Arc<dyn CommentService> =
                Arc::new(data::ApiCommentService::new(client.clone()));
            let interaction_api: Arc<dyn InteractionService> =
                Arc::new(data::ApiInteractionService::new(client.clone()));
            let user_api: Arc<dyn UserService> = Arc::new(data::ApiUserService::new(client));

            feed_service = Some(feed_api);
            comment_service = Some(comment_api);
            interaction_service = Some(interaction_api);
            user_service = Some(user_api);

            status = match &viewer {
                Some(user) => format!(
                    "Fotolenta · {} ({}) · конфиг {display_path}",
                    user.display_name(),
                    user.handle()
                ),
                None => format!(
                    "Fotolenta · гость (init_data не принят) · конфиг {display_path}"
                ),
            };
        }
        Err(err) => {
            status = format!("Клиент не создан: {err} · конфиг {display_path}");
        }
    }

    let options = ui::Options {
        status_message: status,
        viewer,
        feed_service,
        comment_service,
        interaction_service,
        user_service,
        fetch_on_start: true,
    };

    let mut model = ui::Model::new(options);
    model.run()?;

    Ok(())
}

fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/fotolenta/config.yaml".to_string()
    }
}
