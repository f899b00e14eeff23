//! 只读行情推送服务
//!
//! 客户端连上来先发一帧品种列表（JSON数组），之后按节奏收到
//! 报价帧。订阅者只有读路径：所有报价都经资源协调器排队拉取，
//! 且由OffloadPool限流，慢客户端只会丢帧，拖不垮执行通道。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, tungstenite::Result};
use tracing::{error, info, warn};

use crate::trading::coordinator::{OffloadPool, ResourceCoordinator};

const PUSH_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_quote_stream(
    addr: &str,
    coordinator: Arc<ResourceCoordinator>,
    pool: Arc<OffloadPool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("行情推送服务监听 {}", addr);
    while let Ok((stream, peer)) = listener.accept().await {
        tokio::spawn(accept_connection(
            peer,
            stream,
            coordinator.clone(),
            pool.clone(),
        ));
    }
    Ok(())
}

async fn accept_connection(
    peer: SocketAddr,
    stream: TcpStream,
    coordinator: Arc<ResourceCoordinator>,
    pool: Arc<OffloadPool>,
) {
    if let Err(e) = handle_connection(peer, stream, coordinator, pool).await {
        match e {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::Protocol(_)
            | tungstenite::Error::Utf8 => (),
            err => error!("Error processing connection: {}", err),
        }
    }
}

async fn handle_connection(
    peer: SocketAddr,
    stream: TcpStream,
    coordinator: Arc<ResourceCoordinator>,
    pool: Arc<OffloadPool>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("新的行情订阅连接: {}", peer);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // 首帧必须是品种列表
    let symbols: Vec<String> = loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) if msg.is_text() => {
                let text = msg.to_text()?;
                match serde_json::from_str::<Vec<String>>(text) {
                    Ok(list) if !list.is_empty() => break list,
                    _ => {
                        warn!("订阅帧不合法 peer={}: {}", peer, text);
                        ws_sender
                            .send(Message::Text(
                                json!({"error": "expect symbol list"}).to_string(),
                            ))
                            .await?;
                    }
                }
            }
            Some(Ok(msg)) if msg.is_close() => return Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        }
    };
    info!("订阅品种 peer={} symbols={:?}", peer, symbols);

    let (tx, mut rx) = mpsc::channel::<String>(32);
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for symbol in &symbols {
                    let coordinator = coordinator.clone();
                    let tx = tx.clone();
                    let symbol = symbol.clone();
                    // 池满直接丢本轮，下一轮再推
                    pool.try_spawn(async move {
                        match coordinator.quote(&symbol).await {
                            Ok(q) => {
                                let frame = json!({
                                    "symbol": q.symbol,
                                    "bid": q.bid,
                                    "ask": q.ask,
                                    "time": q.time,
                                })
                                .to_string();
                                let _ = tx.send(frame).await;
                            }
                            Err(e) => warn!("拉取报价失败 symbol={}: {}", symbol, e),
                        }
                    });
                }
            }
            Some(frame) = rx.recv() => {
                ws_sender.send(Message::Text(frame)).await?;
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(m)) if m.is_close() => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
        }
    }
    info!("行情订阅断开 peer={}", peer);
    Ok(())
}
