//! Interactive group sessions: stdin lines go to the group, group
//! messages come out as JSONL.

use std::time::Duration;

use pluto_protocol::{GroupKey, ProtocolEvent, RuntimeChannels};
use pluto_transport::fields::tags;
use pluto_transport::{MessageType, TaggedFields};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::common::ctrl_c;
use crate::events::{emit, EventMessage, EventProtocol};

/// Chat lines exchanged inside a session group.
pub const CHAT: MessageType = MessageType::from_u128(0x6368_6174_0000_4000_8000_0000_0000_0001);

const JOIN_RETRY: Duration = Duration::from_secs(1);

/// Create and announce a group, then chat in it.
pub async fn host(
    channels: RuntimeChannels,
    interest: Uuid,
    name: Uuid,
    access_key: String,
) -> anyhow::Result<()> {
    let key = GroupKey::new(interest, name);
    channels.handle.subscribe(interest, CHAT).await?;
    channels
        .handle
        .create_group(key, access_key.into_bytes(), true)
        .await?;

    eprintln!("Hosting group {key}");
    eprintln!("Join with: pluto-cli join --interest {interest} --name {name}\n");
    run(channels, key, None).await
}

/// Join an announced group, retrying until the leader accepts.
pub async fn join(
    channels: RuntimeChannels,
    interest: Uuid,
    name: Uuid,
    access_key: String,
) -> anyhow::Result<()> {
    let key = GroupKey::new(interest, name);
    channels.handle.subscribe(interest, CHAT).await?;

    eprintln!("Waiting for group {key}...");
    run(channels, key, Some(access_key)).await
}

/// Session loop. `pending` holds the access key until the join is accepted.
async fn run(
    mut channels: RuntimeChannels,
    key: GroupKey,
    mut pending: Option<String>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut retry = tokio::time::interval(JOIN_RETRY);

    let shutdown = ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = retry.tick(), if pending.is_some() => {
                if let Some(access_key) = &pending {
                    let sent = channels.handle.join_group(key, access_key.clone()).await?;
                    tracing::debug!(group = %key, sent, "join attempt");
                }
            }
            event = channels.events.recv() => {
                let Some(event) = event else { break };
                if let ProtocolEvent::GroupJoined { key: joined, leader } = &event {
                    if *joined == key {
                        pending = None;
                        eprintln!("Joined {key}, leader {}", leader.short());
                    }
                }
                emit(&EventProtocol::from(&event));
            }
            message = channels.messages.recv() => {
                let Some(message) = message else { break };
                if message.group == key {
                    emit(&EventMessage::from(&message));
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) if pending.is_some() => {
                        eprintln!("not joined yet, dropped: {line}");
                    }
                    Some(line) => {
                        channels.handle.send_to_group(key, chat_line(key, &line)).await?;
                    }
                    None => stdin_open = false,
                }
            }
            _ = &mut shutdown => break,
        }
    }

    channels.handle.shutdown().await;
    Ok(())
}

fn chat_line(key: GroupKey, line: &str) -> TaggedFields {
    key.message(CHAT).with(tags::DATA, line.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_line_carries_group_and_text() {
        let key = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let fields = chat_line(key, "hello");
        assert_eq!(MessageType::of(&fields), Some(CHAT));
        assert_eq!(GroupKey::from_fields(&fields), Some(key));
        assert_eq!(fields.get(tags::DATA).map(|d| &d[..]), Some(&b"hello"[..]));
    }
}
