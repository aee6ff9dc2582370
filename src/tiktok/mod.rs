/// TikTok integration
///
/// OAuth linking with PKCE, token refresh, and video publishing through
/// either the legacy upload/publish endpoints or the Content Posting API.
pub mod client;
#[cfg(test)]
pub(crate) mod fake;
pub mod oauth;
pub mod pkce;
pub mod publish;
pub mod records;

pub use client::{HttpTikTokClient, TikTokApi};
pub use oauth::OAuthService;
pub use publish::PublishService;

use serde::{Deserialize, Serialize};

pub const AUTHORIZE_PATH: &str = "/v2/auth/authorize/";
pub const TOKEN_PATH: &str = "/v2/oauth/token/";
pub const USER_INFO_PATH: &str = "/v2/user/info/";
pub const CREATOR_INFO_PATH: &str = "/v2/post/publish/creator_info/query/";
pub const DIRECT_POST_INIT_PATH: &str = "/v2/post/publish/video/init/";
pub const INBOX_INIT_PATH: &str = "/v2/post/publish/inbox/video/init/";
pub const LEGACY_UPLOAD_PATH: &str = "/v2/video/upload/";
pub const LEGACY_PUBLISH_PATH: &str = "/v2/video/publish/";

pub const SCOPE_VIDEO_PUBLISH: &str = "video.publish";
pub const SCOPE_VIDEO_UPLOAD: &str = "video.upload";

/// Maximum caption length accepted by TikTok
pub const MAX_CAPTION_CHARS: usize = 2200;

/// Caller's privacy intent for a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Friends,
    Private,
}

impl Privacy {
    /// Lenient parse; anything unrecognized is public
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "private" | "2" | "self_only" => Privacy::Private,
            "friends" | "1" | "mutual_follow_friends" => Privacy::Friends,
            _ => Privacy::Public,
        }
    }

    /// Numeric level used by the legacy publish endpoint
    pub fn legacy_level(&self) -> i32 {
        match self {
            Privacy::Public => 0,
            Privacy::Friends => 1,
            Privacy::Private => 2,
        }
    }

    /// Content Posting privacy levels acceptable for this intent, most preferred first
    pub fn preferred_levels(&self) -> &'static [&'static str] {
        match self {
            Privacy::Public => &[
                "PUBLIC_TO_EVERYONE",
                "FOLLOWER_OF_CREATOR",
                "MUTUAL_FOLLOW_FRIENDS",
                "SELF_ONLY",
            ],
            Privacy::Friends => &["MUTUAL_FOLLOW_FRIENDS", "SELF_ONLY"],
            Privacy::Private => &["SELF_ONLY"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Friends => "friends",
            Privacy::Private => "private",
        }
    }
}

/// How a video reaches the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Posted directly to the profile
    Direct,
    /// Sent to the creator's inbox as a draft
    Inbox,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Direct => "direct",
            PublishMode::Inbox => "inbox",
        }
    }
}

/// Where the video bytes come from
#[derive(Debug, Clone)]
pub enum VideoSource {
    Url(String),
    Bytes { data: Vec<u8>, content_type: String },
}

impl VideoSource {
    pub fn media_url(&self) -> Option<&str> {
        match self {
            VideoSource::Url(url) => Some(url),
            VideoSource::Bytes { .. } => None,
        }
    }
}

/// Truncate a caption to the provider's limit on a character boundary
pub fn truncate_caption(text: &str) -> String {
    text.trim().chars().take(MAX_CAPTION_CHARS).collect()
}
