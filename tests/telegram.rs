use std::time::Duration;

use diaryrelay::{
    build_http_client,
    error::SendError,
    messenger::{Destination, Messenger},
    sources::Attachment,
    telegram::TelegramClient,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client(server: &MockServer) -> TelegramClient {
    let http = build_http_client(Duration::from_secs(5)).unwrap();
    TelegramClient::with_api_base(http, "TOKEN".into(), server.uri())
}

fn photos(n: usize) -> Vec<Attachment> {
    (1..=n)
        .map(|i| Attachment {
            file_name: format!("{i}.jpg"),
            // Kept ASCII so body matchers can read the multipart payload.
            bytes: format!("jpeg-bytes-{i}").into_bytes(),
        })
        .collect()
}

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
}

fn body(req: &Request) -> String {
    String::from_utf8_lossy(&req.body).into_owned()
}

#[tokio::test]
async fn album_is_sent_as_media_group_with_caption_on_first_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMediaGroup"))
        .and(body_string_contains("attach://photo0"))
        .respond_with(ok(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .send(&Destination::new("-100"), photos(3), Some("hello caption"), true)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let sent = body(&requests[0]);
    assert!(sent.contains(r#"{"type":"photo","media":"attach://photo0","caption":"hello caption"}"#));
    assert!(sent.contains(r#"{"type":"photo","media":"attach://photo2"}"#));
    assert!(sent.contains(r#"filename="3.jpg""#));
    assert!(sent.contains("-100"));
}

#[tokio::test]
async fn album_without_caption_has_no_caption_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMediaGroup"))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;

    client(&server)
        .send(&Destination::new("-100"), photos(2), None, true)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(!body(&requests[0]).contains("caption"));
}

#[tokio::test]
async fn single_image_uses_send_photo() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendPhoto"))
        .respond_with(ok(json!({ "message_id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .send(&Destination::new("-100"), photos(1), Some("solo"), true)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let sent = body(&requests[0]);
    assert!(sent.contains(r#"name="photo"; filename="1.jpg""#));
    assert!(sent.contains("solo"));
}

#[tokio::test]
async fn text_only_uses_send_message_without_preview() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .and(body_json(json!({
            "chat_id": "@diary",
            "text": "Pong!",
            "disable_web_page_preview": true,
        })))
        .respond_with(ok(json!({ "message_id": 2 })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .send_text(&Destination::new("@diary"), "Pong!")
        .await
        .unwrap();
}

#[tokio::test]
async fn more_than_ten_attachments_are_rejected_locally() {
    let server = MockServer::start().await;

    let err = client(&server)
        .send(&Destination::new("-100"), photos(11), None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::TooManyAttachments(11)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn api_errors_carry_code_and_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendPhoto"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found",
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .send(&Destination::new("-100"), photos(1), None, true)
        .await
        .unwrap_err();

    match err {
        SendError::Api { code, description } => {
            assert_eq!(code, 400);
            assert_eq!(description, "Bad Request: chat not found");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn get_destination_reports_missing_chats_as_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/getChat"))
        .and(body_json(json!({ "chat_id": "-100" })))
        .respond_with(ok(json!({ "id": -100, "title": "author-one" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/getChat"))
        .and(body_json(json!({ "chat_id": "-200" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found",
        })))
        .mount(&server)
        .await;

    let tg = client(&server);
    let found = tg.get_destination(&Destination::new("-100")).await.unwrap();
    assert_eq!(found.name, "author-one");
    assert!(tg.get_destination(&Destination::new("-200")).await.is_none());
}

#[tokio::test]
async fn identity_and_updates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/getMe"))
        .respond_with(ok(json!({ "id": 7, "is_bot": true, "username": "diary_bot" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/getUpdates"))
        .respond_with(ok(json!([
            { "update_id": 10, "message": {
                "chat": { "id": -5 }, "from": { "id": 1, "is_bot": false }, "text": "/ping" } },
            { "update_id": 11, "message": {
                "chat": { "id": -5 }, "from": { "id": 2, "is_bot": true }, "text": "/status" } },
            { "update_id": 12 }
        ])))
        .mount(&server)
        .await;

    let tg = client(&server);
    assert_eq!(tg.identity().await.unwrap().username, "diary_bot");

    let updates = tg.get_updates(0, Duration::from_secs(0)).await.unwrap();
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[0].chat, Destination::new("-5"));
    assert_eq!(updates[0].text, "/ping");
    assert!(!updates[0].from_bot);
    assert!(updates[1].from_bot);
    assert_eq!(updates[2].text, "");
}

#[tokio::test]
async fn unreadable_response_is_an_internal_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/getMe"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server).identity().await.unwrap_err();
    assert!(matches!(err, SendError::Api { code: 502, .. }));
}
