//! Exports every page of a cursor-paginated JSON listing.
//!
//! ```text
//! REQUEST_FLOW_TOKEN=xoxp-... cargo run --example paginated_export -- \
//!     https://slack.com/api/conversations.history channel=C024BE91L [--items messages] [--log]
//! ```
//!
//! Pages are expected to look like
//! `{"ok": true, "<items>": [...], "response_metadata": {"next_cursor": "..."}}`.

use request_flow::{
    ExportClient, FlowError, FlowOptions, Page, RequestFlowHooks, SequenceRenderer, TracingHooks,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

struct Args {
    url: String,
    params: Vec<(String, String)>,
    items_key: String,
    log: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut url = None;
    let mut params = Vec::new();
    let mut items_key = "messages".to_owned();
    let mut log = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log" => log = true,
            "--items" => {
                items_key = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--items needs a key"))?;
            }
            _ => match arg.split_once('=') {
                Some((key, value)) => params.push((key.to_owned(), value.to_owned())),
                None if url.is_none() => url = Some(arg),
                None => anyhow::bail!("unexpected argument: {arg}"),
            },
        }
    }

    let url = url.ok_or_else(|| {
        anyhow::anyhow!("usage: paginated_export <url> [key=value ...] [--items <key>] [--log]")
    })?;
    Ok(Args {
        url,
        params,
        items_key,
        log,
    })
}

fn extract_page(mut body: Value, items_key: &str) -> request_flow::Result<Page<Value>> {
    if body["ok"] == Value::Bool(false) {
        return Err(FlowError::MalformedResponse(format!("API error: {body}")));
    }
    let items = match body[items_key].take() {
        Value::Array(items) => items,
        other => {
            return Err(FlowError::MalformedResponse(format!(
                "expected `{items_key}` array, got {other}"
            )))
        }
    };
    let cursor = body["response_metadata"]["next_cursor"]
        .as_str()
        .map(str::to_owned);
    Ok(Page::new(items, cursor))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let options = FlowOptions::from_env().map_err(anyhow::Error::msg)?;

    let hooks: Box<dyn RequestFlowHooks> = if args.log {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("request_flow=debug")),
            )
            .init();
        Box::new(TracingHooks::new())
    } else {
        Box::new(SequenceRenderer::stdout().with_options(&options))
    };
    let mut client = ExportClient::from_env(hooks).map_err(anyhow::Error::msg)?;

    let params: Vec<(&str, &str)> = args
        .params
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();

    client.begin_batch(&args.url, None);
    let items = client
        .fetch_paginated(&args.url, &params, |body| extract_page(body, &args.items_key))
        .await;
    client.end_batch();

    let items = items?;
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
