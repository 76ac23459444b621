use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

/// One chat turn in the provider's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Plain text serializes as a bare string; multimodal turns serialize as a
/// part array, matching the OpenAI-compatible chat completions schema.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user turn carrying one text part followed by one image part per URL,
    /// in the given order.
    pub fn multimodal(text: impl Into<String>, image_urls: Vec<String>) -> Self {
        let mut parts = Vec::with_capacity(image_urls.len() + 1);
        parts.push(ContentPart::Text { text: text.into() });
        parts.extend(
            image_urls
                .into_iter()
                .map(|url| ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                }),
        );
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// System prompt plus one user turn, the shape every chat call sends.
pub fn chat_messages(system_prompt: &str, user_input: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_input),
    ]
}

/// Inlines raw image bytes as a `data:` URL the provider accepts in an
/// `image_url` part.
pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}
