use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::SendError,
    messenger::{BotIdentity, Destination, DestinationInfo, Messenger, MAX_BATCH_SIZE},
    sources::Attachment,
};

pub const API_BASE: &str = "https://api.telegram.org";

pub struct TelegramClient {
    client: Client,
    token: String,
    api_base: String,
}

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Serialize)]
struct TelegramInputMedia {
    r#type: &'static str,
    media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
    title: Option<String>,
    username: Option<String>,
    first_name: Option<String>,
}

#[derive(Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    username: Option<String>,
}

#[derive(Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    from: Option<TelegramUser>,
    text: Option<String>,
}

/// Text message received by the bot, as needed by the command listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat: Destination,
    pub text: String,
    pub from_bot: bool,
}

impl TelegramClient {
    pub fn new(client: Client, token: String) -> Self {
        Self::with_api_base(client, token, API_BASE.into())
    }

    pub fn with_api_base(client: Client, token: String, api_base: String) -> Self {
        Self {
            client,
            token,
            api_base: api_base.trim_end_matches('/').to_owned(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, SendError> {
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;

        let tgres: TelegramResponse<T> = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(_) => {
                return Err(SendError::Api {
                    code: status.as_u16(),
                    description: "(diaryrelay) Internal Error".into(),
                })
            }
        };

        if !tgres.ok {
            return Err(SendError::Api {
                code: tgres.error_code.unwrap_or(status.as_u16()),
                description: tgres.description.unwrap_or_default(),
            });
        }

        tgres.result.ok_or_else(|| SendError::Api {
            code: status.as_u16(),
            description: "(diaryrelay) Missing result".into(),
        })
    }

    async fn send_message(
        &self,
        chat_id: &Destination,
        text: &str,
        suppress_link_preview: bool,
    ) -> Result<(), SendError> {
        let req = self.client.post(self.method_url("sendMessage")).json(&json!({
            "chat_id": chat_id.as_str(),
            "text": text,
            "disable_web_page_preview": suppress_link_preview,
        }));

        self.call::<serde_json::Value>(req).await.map(|_| ())
    }

    async fn send_photo(
        &self,
        chat_id: &Destination,
        photo: Attachment,
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        let mut form = Form::new()
            .text("chat_id", chat_id.0.clone())
            .part("photo", Part::bytes(photo.bytes).file_name(photo.file_name));
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_owned());
        }

        let req = self.client.post(self.method_url("sendPhoto")).multipart(form);
        self.call::<serde_json::Value>(req).await.map(|_| ())
    }

    async fn send_media_group(
        &self,
        chat_id: &Destination,
        photos: Vec<Attachment>,
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        let mut media: Vec<TelegramInputMedia> = (0..photos.len())
            .map(|i| TelegramInputMedia {
                r#type: "photo",
                media: format!("attach://photo{i}"),
                caption: None,
            })
            .collect();
        // Telegram shows the first item's caption as the album caption.
        if let (Some(first), Some(caption)) = (media.first_mut(), caption) {
            first.caption = Some(caption.to_owned());
        }
        let media = serde_json::to_string(&media).map_err(|e| SendError::Api {
            code: 0,
            description: format!("(diaryrelay) {e}"),
        })?;

        let mut form = Form::new()
            .text("chat_id", chat_id.0.clone())
            .text("media", media);
        for (i, photo) in photos.into_iter().enumerate() {
            form = form.part(
                format!("photo{i}"),
                Part::bytes(photo.bytes).file_name(photo.file_name),
            );
        }

        let req = self.client.post(self.method_url("sendMediaGroup")).multipart(form);
        self.call::<serde_json::Value>(req).await.map(|_| ())
    }

    /// Long-polls for new messages after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        wait: Duration,
    ) -> Result<Vec<IncomingMessage>, SendError> {
        let req = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(wait + Duration::from_secs(10))
            .json(&json!({
                "offset": offset,
                "timeout": wait.as_secs(),
                "allowed_updates": ["message"],
            }));

        let updates: Vec<TelegramUpdate> = self.call(req).await?;
        Ok(updates
            .into_iter()
            .map(|u| {
                let (chat, text, from_bot) = match u.message {
                    Some(m) => (
                        Destination(m.chat.id.to_string()),
                        m.text.unwrap_or_default(),
                        m.from.map(|f| f.is_bot).unwrap_or(false),
                    ),
                    None => (Destination::new(""), String::new(), false),
                };
                IncomingMessage {
                    update_id: u.update_id,
                    chat,
                    text,
                    from_bot,
                }
            })
            .collect())
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn identity(&self) -> Result<BotIdentity, SendError> {
        let me: TelegramUser = self.call(self.client.post(self.method_url("getMe"))).await?;
        Ok(BotIdentity {
            id: me.id,
            username: me.username.unwrap_or_default(),
        })
    }

    async fn get_destination(&self, id: &Destination) -> Option<DestinationInfo> {
        let req = self
            .client
            .post(self.method_url("getChat"))
            .json(&json!({ "chat_id": id.as_str() }));

        match self.call::<TelegramChat>(req).await {
            Ok(chat) => Some(DestinationInfo {
                id: id.clone(),
                name: chat
                    .title
                    .or(chat.username)
                    .or(chat.first_name)
                    .unwrap_or_else(|| chat.id.to_string()),
            }),
            Err(e) => {
                tracing::debug!(chat = %id, error = %e, "chat lookup failed");
                None
            }
        }
    }

    /// Link previews only exist for text messages; media captions never
    /// render one, so `suppress_link_preview` only affects `sendMessage`.
    async fn send(
        &self,
        destination: &Destination,
        mut attachments: Vec<Attachment>,
        caption: Option<&str>,
        suppress_link_preview: bool,
    ) -> Result<(), SendError> {
        match attachments.len() {
            0 => match caption {
                Some(text) => self.send_message(destination, text, suppress_link_preview).await,
                None => Ok(()),
            },
            1 => {
                let photo = attachments.remove(0);
                self.send_photo(destination, photo, caption).await
            }
            n if n <= MAX_BATCH_SIZE => self.send_media_group(destination, attachments, caption).await,
            n => Err(SendError::TooManyAttachments(n)),
        }
    }
}
