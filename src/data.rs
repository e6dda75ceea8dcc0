use anyhow::Result;
use std::sync::Arc;

use crate::api;

pub trait FeedService: Send + Sync {
    fn load_feed(&self) -> Result<Vec<api::Image>>;
    fn load_my_images(&self) -> Result<Vec<api::Image>>;
    fn load_user_images(&self, telegram_id: i64) -> Result<Vec<api::Image>>;
    fn image_file_url(&self, image_id: i64) -> Result<String>;
}

pub trait CommentService: Send + Sync {
    fn load_comments(&self, image_id: i64) -> Result<Vec<api::Comment>>;
    fn post_comment(&self, image_id: i64, text: &str) -> Result<()>;
}

pub trait InteractionService: Send + Sync {
    fn toggle_like(&self, image_id: i64) -> Result<api::LikeUpdate>;
    fn toggle_subscription(&self, target_id: i64) -> Result<api::SubscriptionUpdate>;
}

pub trait UserService: Send + Sync {
    fn lookup_user(&self, username: &str) -> Result<Option<api::User>>;
    fn subscriptions(&self) -> Result<Vec<api::SubscribedUser>>;
    fn search_history(&self) -> Result<Vec<String>>;
}

// The backend has no point query for a single subscription; state for one
// profile is derived from the full list.
pub fn is_subscribed(subscriptions: &[api::SubscribedUser], telegram_id: i64) -> bool {
    subscriptions
        .iter()
        .any(|entry| entry.telegram_id == telegram_id)
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn load_feed(&self) -> Result<Vec<api::Image>> {
        self.client.feed()
    }

    fn load_my_images(&self) -> Result<Vec<api::Image>> {
        self.client.my_images()
    }

    fn load_user_images(&self, telegram_id: i64) -> Result<Vec<api::Image>> {
        self.client.user_images(telegram_id)
    }

    fn image_file_url(&self, image_id: i64) -> Result<String> {
        Ok(self.client.image_url(image_id)?.to_string())
    }
}

pub struct ApiCommentService {
    client: Arc<api::Client>,
}

impl ApiCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for ApiCommentService {
    fn load_comments(&self, image_id: i64) -> Result<Vec<api::Comment>> {
        self.client.comments(image_id)
    }

    fn post_comment(&self, image_id: i64, text: &str) -> Result<()> {
        self.client.post_comment(image_id, text)
    }
}

pub struct ApiInteractionService {
    client: Arc<api::Client>,
}

impl ApiInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for ApiInteractionService {
    fn toggle_like(&self, image_id: i64) -> Result<api::LikeUpdate> {
        self.client.toggle_like(image_id)
    }

    fn toggle_subscription(&self, target_id: i64) -> Result<api::SubscriptionUpdate> {
        self.client.toggle_subscription(target_id)
    }
}

pub struct ApiUserService {
    client: Arc<api::Client>,
}

impl ApiUserService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl UserService for ApiUserService {
    fn lookup_user(&self, username: &str) -> Result<Option<api::User>> {
        self.client.user_by_username(username)
    }

    fn subscriptions(&self) -> Result<Vec<api::SubscribedUser>> {
        self.client.subscriptions()
    }

    fn search_history(&self) -> Result<Vec<String>> {
        self.client.search_history()
    }
}

#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn load_feed(&self) -> Result<Vec<api::Image>> {
        Ok(vec![
            api::Image {
                id: 1,
                file_path: Some("uploads/1.jpg".into()),
                caption: Some("Закат над рекой".into()),
                likes_count: 3,
                comments_count: 1,
                is_liked: false,
            },
            api::Image {
                id: 2,
                file_path: Some("uploads/2.jpg".into()),
                caption: None,
                likes_count: 0,
                comments_count: 0,
                is_liked: false,
            },
        ])
    }

    fn load_my_images(&self) -> Result<Vec<api::Image>> {
        Ok(vec![api::Image {
            id: 3,
            file_path: Some("uploads/3.jpg".into()),
            caption: Some("Первый снег".into()),
            likes_count: 5,
            comments_count: 2,
            is_liked: true,
        }])
    }

    fn load_user_images(&self, _telegram_id: i64) -> Result<Vec<api::Image>> {
        Ok(Vec::new())
    }

    fn image_file_url(&self, image_id: i64) -> Result<String> {
        Ok(format!("https://example.invalid/api/images/{image_id}/file"))
    }
}

#[derive(Default)]
pub struct MockCommentService;

impl CommentService for MockCommentService {
    fn load_comments(&self, _image_id: i64) -> Result<Vec<api::Comment>> {
        Ok(vec![api::Comment {
            first_name: Some("Анна".into()),
            username: Some("anna".into()),
            text: "Отличное фото!".into(),
        }])
    }

    fn post_comment(&self, _image_id: i64, _text: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockInteractionService;

impl InteractionService for MockInteractionService {
    fn toggle_like(&self, _image_id: i64) -> Result<api::LikeUpdate> {
        Ok(api::LikeUpdate {
            likes_count: 1,
            is_liked: true,
        })
    }

    fn toggle_subscription(&self, _target_id: i64) -> Result<api::SubscriptionUpdate> {
        Ok(api::SubscriptionUpdate {
            is_subscribed: true,
        })
    }
}

#[derive(Default)]
pub struct MockUserService;

impl UserService for MockUserService {
    fn lookup_user(&self, username: &str) -> Result<Option<api::User>> {
        Ok(Some(api::User {
            id: 1,
            telegram_id: 1000,
            username: Some(username.to_string()),
            first_name: Some("Анна".into()),
            last_name: None,
        }))
    }

    fn subscriptions(&self) -> Result<Vec<api::SubscribedUser>> {
        Ok(vec![api::SubscribedUser {
            telegram_id: 1000,
            username: Some("anna".into()),
            first_name: Some("Анна".into()),
            last_name: Some("Иванова".into()),
        }])
    }

    fn search_history(&self) -> Result<Vec<String>> {
        Ok(vec!["anna".into(), "ivan".into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(telegram_id: i64) -> api::SubscribedUser {
        api::SubscribedUser {
            telegram_id,
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn is_subscribed_scans_by_telegram_id() {
        let subs = vec![entry(10), entry(20), entry(30)];
        assert!(is_subscribed(&subs, 20));
        assert!(!is_subscribed(&subs, 40));
    }

    #[test]
    fn is_subscribed_on_empty_list() {
        assert!(!is_subscribed(&[], 1));
    }
}
