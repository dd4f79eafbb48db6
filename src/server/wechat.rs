//! WeChat-style messaging webhook.
//!
//! GET performs the platform's signature handshake; POST receives flat XML
//! messages carrying text commands (`help`, `score <strategy> [top]`) or
//! menu click events, and replies with a text-reply XML document. Handler
//! failures degrade to an apology reply, never an error status.

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use super::AppState;
use crate::scoring::{format_ranking, scorer_for, STRATEGY_KEYS};

const HELP_TEXT: &str = "Stock analysis assistant commands:\n\
\n\
1. Strategy ranking\n\
send: score <strategy> [top]\n\
strategies: rtpv, value, growth, income, trend, reverse\n\
example: score rtpv 10\n\
\n\
2. Stock lookup (under development)\n\
send: info <stock code>\n\
\n\
3. Conditional query (under development)\n\
send: query <condition>\n\
\n\
Send help to show this message";

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub echostr: String,
}

/// SHA-1 over the sorted (token, timestamp, nonce) triple.
pub fn check_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    hasher.update(parts.concat().as_bytes());
    hex::encode(hasher.finalize()) == signature
}

/// GET /wx — server verification handshake.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> String {
    if check_signature(
        &state.config.wechat_token,
        &params.timestamp,
        &params.nonce,
        &params.signature,
    ) {
        params.echostr
    } else {
        "Invalid signature".to_string()
    }
}

/// Parse a flat message XML document into tag → text pairs.
pub fn parse_message_xml(xml: &str) -> HashMap<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Text(e)) => {
                if let (Some(tag), Ok(text)) = (&current, e.unescape()) {
                    fields.insert(tag.clone(), text.into_owned());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(tag) = &current {
                    fields.insert(
                        tag.clone(),
                        String::from_utf8_lossy(&e.into_inner()).into_owned(),
                    );
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    fields
}

/// Text-reply XML, with from/to swapped relative to the inbound message.
pub fn format_reply(msg: &HashMap<String, String>, content: &str) -> String {
    format!(
        "<xml>\n\
         <ToUserName><![CDATA[{}]]></ToUserName>\n\
         <FromUserName><![CDATA[{}]]></FromUserName>\n\
         <CreateTime>{}</CreateTime>\n\
         <MsgType><![CDATA[text]]></MsgType>\n\
         <Content><![CDATA[{}]]></Content>\n\
         </xml>",
        msg.get("FromUserName").map(String::as_str).unwrap_or(""),
        msg.get("ToUserName").map(String::as_str).unwrap_or(""),
        Utc::now().timestamp(),
        content,
    )
}

/// POST /wx — inbound message dispatch.
pub async fn receive_message(
    State(state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    info!("Webhook message received: {} bytes", body.len());
    let msg = parse_message_xml(&body);

    let content = match handle_message(&state, &msg).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Webhook handler failed: {:#}", e);
            "The server hit an error, please try again later".to_string()
        }
    };

    (
        [(header::CONTENT_TYPE, "application/xml")],
        format_reply(&msg, &content),
    )
}

async fn handle_message(
    state: &AppState,
    msg: &HashMap<String, String>,
) -> anyhow::Result<String> {
    match msg.get("MsgType").map(String::as_str) {
        Some("event") if msg.get("Event").map(String::as_str) == Some("CLICK") => {
            let event_key = msg.get("EventKey").map(String::as_str).unwrap_or("");
            handle_menu_click(state, event_key).await
        }
        Some("text") => {
            let content = msg.get("Content").map(String::as_str).unwrap_or("").trim();
            let mut parts = content.split_whitespace();
            match parts.next().map(|c| c.to_lowercase()).as_deref() {
                Some("score") => {
                    let args: Vec<&str> = parts.collect();
                    handle_score(state, &args).await
                }
                Some("query") => Ok("Conditional query is under development...".to_string()),
                Some("info") => Ok("Stock lookup is under development...".to_string()),
                _ => Ok(HELP_TEXT.to_string()),
            }
        }
        Some(_) => Ok("Only text messages are supported for now".to_string()),
        None => Ok(HELP_TEXT.to_string()),
    }
}

/// Menu keys map onto the score command with a default top 10.
async fn handle_menu_click(state: &AppState, event_key: &str) -> anyhow::Result<String> {
    if let Some(strategy) = event_key.strip_prefix("score_") {
        if STRATEGY_KEYS.contains(&strategy) {
            return handle_score(state, &[strategy, "10"]).await;
        }
    }
    Ok(HELP_TEXT.to_string())
}

async fn handle_score(state: &AppState, args: &[&str]) -> anyhow::Result<String> {
    let Some(strategy) = args.first() else {
        return Ok("Please name a strategy, e.g.: score rtpv 10".to_string());
    };
    let top_n: usize = args.get(1).and_then(|t| t.parse().ok()).unwrap_or(10);

    let Some(date) = state.db.latest_metric_date().await? else {
        return Ok("No valid trading data found".to_string());
    };
    info!("Scoring {} for {}", strategy, date);

    // the webhook uses a shorter RTPV window than the CLI default
    let Some(scorer) = scorer_for(strategy, 14) else {
        return Ok(format!(
            "Unknown strategy {}; available: {}",
            strategy,
            STRATEGY_KEYS.join(", ")
        ));
    };

    let entries = scorer.calculate(&state.db, date, top_n).await?;
    if entries.is_empty() {
        return Ok(format!("No scores could be computed for {}", date));
    }

    Ok(format!(
        "{} ranking for {} (top {}):\n\n{}\n\n{}",
        scorer.name(),
        date,
        top_n,
        format_ranking(&entries, top_n),
        scorer.describe(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_check_signature() {
        // sha1("abc" + "123" + "token") with parts sorted: "123" "abc" "token"
        let mut hasher = Sha1::new();
        hasher.update(b"123abctoken");
        let expected = hex::encode(hasher.finalize());

        assert!(check_signature("token", "abc", "123", &expected));
        assert!(!check_signature("token", "abc", "123", "bogus"));
    }

    #[test]
    fn test_parse_message_xml() {
        let xml = "<xml>\
            <ToUserName><![CDATA[server]]></ToUserName>\
            <FromUserName><![CDATA[user42]]></FromUserName>\
            <MsgType><![CDATA[text]]></MsgType>\
            <Content><![CDATA[score rtpv 5]]></Content>\
            </xml>";
        let msg = parse_message_xml(xml);
        assert_eq!(msg.get("FromUserName").unwrap(), "user42");
        assert_eq!(msg.get("Content").unwrap(), "score rtpv 5");
    }

    #[test]
    fn test_format_reply_swaps_users() {
        let mut msg = HashMap::new();
        msg.insert("ToUserName".to_string(), "server".to_string());
        msg.insert("FromUserName".to_string(), "user42".to_string());

        let reply = format_reply(&msg, "hello");
        assert!(reply.contains("<ToUserName><![CDATA[user42]]></ToUserName>"));
        assert!(reply.contains("<FromUserName><![CDATA[server]]></FromUserName>"));
        assert!(reply.contains("<Content><![CDATA[hello]]></Content>"));
    }
}
