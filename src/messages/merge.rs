//! Streaming merge of message fragments.
//!
//! Model adapters emit many tiny fragments per logical utterance, co-signed
//! with a merge tag. Downstream consumers (persistence, the A2A stream) want
//! one message per utterance while still receiving results incrementally.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use crate::error::CoreError;
use crate::messages::{AssistantMessage, Message, UserMessage};

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, CoreError>> + Send>>;

/// Collapse consecutive fragments that share a non-zero merge tag.
///
/// One message stays buffered. The buffer absorbs the next item iff both are
/// the same kind (user with user, assistant with assistant) and carry the
/// same non-zero tag; anything else flushes the buffer downstream first. Tool
/// messages never merge. An upstream error flushes the buffer, surfaces the
/// error, and ends the stream.
pub fn merge_messages_streaming<S>(input: S) -> MessageStream
where
    S: Stream<Item = Result<Message, CoreError>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut input = Box::pin(input);
        let mut current: Option<Message> = None;

        while let Some(item) = input.next().await {
            let next = match item {
                Ok(next) => next,
                Err(err) => {
                    if let Some(buffered) = current.take() {
                        yield Ok(buffered);
                    }
                    yield Err(err);
                    return;
                }
            };

            let Some(buffered) = current.take() else {
                current = Some(next);
                continue;
            };

            if next.merge_tag() == 0 || next.merge_tag() != buffered.merge_tag() {
                yield Ok(buffered);
                current = Some(next);
                continue;
            }

            match next {
                Message::User(fragment) => match buffered {
                    Message::User(head) => match merge_user(head, fragment) {
                        Ok(merged) => current = Some(Message::User(merged)),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    },
                    other => {
                        yield Err(CoreError::merge_type_mismatch("user", other.kind_name()));
                        return;
                    }
                },
                Message::Assistant(fragment) => match buffered {
                    Message::Assistant(head) => match merge_assistant(head, fragment) {
                        Ok(merged) => current = Some(Message::Assistant(merged)),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    },
                    other => {
                        yield Err(CoreError::merge_type_mismatch(
                            "assistant",
                            other.kind_name(),
                        ));
                        return;
                    }
                },
                tool_message => {
                    yield Ok(buffered);
                    current = Some(tool_message);
                }
            }
        }

        if let Some(buffered) = current.take() {
            yield Ok(buffered);
        }
    })
}

fn merge_user(head: UserMessage, fragment: UserMessage) -> Result<UserMessage, CoreError> {
    let mut extra = head.extra().clone();
    for (key, value) in fragment.extra() {
        extra.insert(key.clone(), value.clone());
    }

    Ok(
        UserMessage::new(format!("{}{}", head.content(), fragment.content()))?
            .with_extra(extra)
            .with_merge_tag(fragment.merge_tag()),
    )
}

fn merge_assistant(
    head: AssistantMessage,
    fragment: AssistantMessage,
) -> Result<AssistantMessage, CoreError> {
    let mut attachments = head.attachments().to_vec();
    attachments.extend_from_slice(fragment.attachments());

    Ok(
        AssistantMessage::new(format!("{}{}", head.text(), fragment.text()))?
            .with_reasoning(format!("{}{}", head.reasoning(), fragment.reasoning()))
            .with_attachments(attachments)
            .with_merge_tag(fragment.merge_tag()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ToolRequestMessage, ToolResponseMessage};
    use futures_util::stream;
    use serde_json::{Map, json};

    fn assistant(text: &str, tag: u64) -> Message {
        Message::Assistant(AssistantMessage::new(text).unwrap().with_merge_tag(tag))
    }

    fn user(content: &str, tag: u64) -> Message {
        Message::User(UserMessage::new(content).unwrap().with_merge_tag(tag))
    }

    async fn collect(input: Vec<Result<Message, CoreError>>) -> Vec<Result<Message, CoreError>> {
        merge_messages_streaming(stream::iter(input)).collect().await
    }

    #[tokio::test]
    async fn fragments_with_same_tag_merge() {
        let merged = collect(vec![
            Ok(assistant("Hi, ", 42)),
            Ok(assistant("friend!", 42)),
        ])
        .await;

        assert_eq!(merged.len(), 1);
        match merged[0].as_ref().unwrap() {
            Message::Assistant(m) => {
                assert_eq!(m.text(), "Hi, friend!");
                assert_eq!(m.merge_tag(), 42);
            }
            other => panic!("expected assistant, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tag_change_flushes_buffer() {
        let merged = collect(vec![
            Ok(assistant("one", 1)),
            Ok(assistant("two", 2)),
        ])
        .await;

        let texts: Vec<String> = merged
            .into_iter()
            .map(|m| match m.unwrap() {
                Message::Assistant(a) => a.text().to_string(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn zero_tags_never_merge() {
        let merged = collect(vec![Ok(assistant("a", 0)), Ok(assistant("b", 0))]).await;
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn tool_message_flushes_and_passes_through() {
        let request = Message::ToolRequest(
            ToolRequestMessage::new(Map::new(), "get_weather", "c1")
                .unwrap()
                .with_merge_tag(1),
        );

        let merged = collect(vec![Ok(assistant("Let me check.", 1)), Ok(request.clone())]).await;

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].as_ref().unwrap(), &request);
    }

    #[tokio::test]
    async fn tool_messages_with_same_tag_do_not_merge() {
        let first = Message::ToolResponse(
            ToolResponseMessage::new(json!({"a": 1}), "t", "c1")
                .unwrap()
                .with_merge_tag(9),
        );
        let second = Message::ToolResponse(
            ToolResponseMessage::new(json!({"b": 2}), "t", "c2")
                .unwrap()
                .with_merge_tag(9),
        );

        let merged = collect(vec![Ok(first.clone()), Ok(second.clone())]).await;
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn user_extra_union_right_wins() {
        let mut left = Map::new();
        left.insert("locale".into(), json!("en"));
        left.insert("source".into(), json!("webhook"));
        let mut right = Map::new();
        right.insert("locale".into(), json!("de"));

        let merged = collect(vec![
            Ok(Message::User(
                UserMessage::new("Hallo ").unwrap().with_extra(left).with_merge_tag(5),
            )),
            Ok(Message::User(
                UserMessage::new("Welt").unwrap().with_extra(right).with_merge_tag(5),
            )),
        ])
        .await;

        assert_eq!(merged.len(), 1);
        match merged[0].as_ref().unwrap() {
            Message::User(m) => {
                assert_eq!(m.content(), "Hallo Welt");
                assert_eq!(m.extra()["locale"], json!("de"));
                assert_eq!(m.extra()["source"], json!("webhook"));
            }
            other => panic!("expected user, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn kind_mismatch_with_shared_tag_fails() {
        let merged = collect(vec![Ok(user("question", 3)), Ok(assistant("answer", 3))]).await;

        assert_eq!(merged.len(), 1);
        assert!(matches!(merged[0], Err(CoreError::Internal(_))));
    }

    #[tokio::test]
    async fn upstream_error_flushes_then_surfaces() {
        let merged = collect(vec![
            Ok(assistant("partial", 1)),
            Err(CoreError::unavailable("stream dropped")),
            Ok(assistant("never seen", 1)),
        ])
        .await;

        assert_eq!(merged.len(), 2);
        match merged[0].as_ref().unwrap() {
            Message::Assistant(m) => assert_eq!(m.text(), "partial"),
            other => panic!("expected assistant, got {other:?}"),
        }
        assert!(matches!(merged[1], Err(CoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn end_of_input_flushes_buffer() {
        let merged = collect(vec![Ok(assistant("tail", 8))]).await;
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn text_concatenation_is_preserved() {
        let merged = collect(vec![
            Ok(assistant("a", 1)),
            Ok(assistant("b", 1)),
            Ok(assistant("c", 1)),
            Ok(assistant("d", 2)),
        ])
        .await;

        let joined: String = merged
            .into_iter()
            .map(|m| match m.unwrap() {
                Message::Assistant(a) => a.text().to_string(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(joined, "abcd");
    }
}
