//! Command handler for registry requests.
//!
//! Requests arrive either as text lines (`add bad foo`) or as callback data
//! attached to a previously offered action. Each request produces a
//! [`Reply`] with rendered text and any follow-up actions.

use std::sync::Arc;

use crate::error::{ErrorContext, Result, WardenError};
use crate::models::{
    AddOutcome, CallbackData, Category, Decision, MutationReport, ResolveOutcome,
    SelectableAction,
};
use crate::pager::Listing;
use crate::publish::SnapshotPublisher;
use crate::registry::CategoryRegistry;
use crate::render::{listing_actions, render_listing, render_report};

const HELP_TEXT: &str = "Commands:\n\
     add <category> <pattern>\n\
     remove <category> <pattern>\n\
     list <category> [page]\n\
     ask <token> <new|replace|cancel>\n\
     callback <json>";

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Add { category: Category, pattern: String },
    Remove { category: Category, pattern: String },
    List { category: Category, page: usize },
    Resolve { token: String, decision: Decision },
    Help,
    /// Callback for a display-only action.
    Noop,
}

impl Request {
    /// Parse a command line.
    pub fn parse_line(line: &str) -> Result<Self> {
        let (command, rest) = split_word(line.trim());

        match command.to_ascii_lowercase().as_str() {
            "add" | "remove" => {
                let (category, pattern) = split_word(rest);
                let category = Category::parse(required(category, "category")?)?;
                let pattern = required(pattern, "pattern")?.to_string();
                if command.eq_ignore_ascii_case("add") {
                    Ok(Self::Add { category, pattern })
                } else {
                    Ok(Self::Remove { category, pattern })
                }
            }
            "list" => {
                let (category, page) = split_word(rest);
                let category = Category::parse(required(category, "category")?)?;
                let page = if page.is_empty() {
                    1
                } else {
                    parse_page(page)?
                };
                Ok(Self::List { category, page })
            }
            "ask" => {
                let (token, decision) = split_word(rest);
                Ok(Self::Resolve {
                    token: required(token, "token")?.to_string(),
                    decision: Decision::parse(required(decision, "decision")?)?,
                })
            }
            "callback" => Self::from_callback(&CallbackData::decode(required(rest, "payload")?)?),
            "help" | "" => Ok(Self::Help),
            other => Err(WardenError::InvalidRequest(format!(
                "unknown command: {}",
                other
            ))),
        }
    }

    /// Turn callback data from a selected action back into a request.
    pub fn from_callback(data: &CallbackData) -> Result<Self> {
        let action_type = data.action_type.as_deref().unwrap_or_default();

        match data.action.as_str() {
            "ask" => {
                let token = data
                    .data
                    .as_ref()
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| {
                        WardenError::InvalidRequest("callback is missing its token".to_string())
                    })?;
                Ok(Self::Resolve {
                    token: token.to_string(),
                    decision: Decision::parse(action_type)?,
                })
            }
            "list" => {
                let page = data
                    .data
                    .as_ref()
                    .and_then(|d| d.as_u64())
                    .ok_or_else(|| {
                        WardenError::InvalidRequest("callback is missing its page".to_string())
                    })?;
                let page = usize::try_from(page).map_err(|_| {
                    WardenError::InvalidRequest(format!("invalid page number: {}", page))
                })?;
                Ok(Self::List {
                    category: Category::parse(action_type)?,
                    page,
                })
            }
            "none" => Ok(Self::Noop),
            other => Err(WardenError::InvalidRequest(format!(
                "unknown callback action: {}",
                other
            ))),
        }
    }

    fn context(&self) -> ErrorContext {
        match self {
            Self::Add { category, .. } => ErrorContext::new("add").with_category(*category),
            Self::Remove { category, .. } => ErrorContext::new("remove").with_category(*category),
            Self::List { category, .. } => ErrorContext::new("list").with_category(*category),
            Self::Resolve { token, .. } => ErrorContext::new("resolve").with_token(token.as_str()),
            Self::Help | Self::Noop => ErrorContext::new("help"),
        }
    }
}

/// Split off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim()),
        None => (s, ""),
    }
}

fn required<'a>(value: &'a str, name: &str) -> Result<&'a str> {
    if value.is_empty() {
        Err(WardenError::InvalidRequest(format!("missing {}", name)))
    } else {
        Ok(value)
    }
}

fn parse_page(raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| WardenError::InvalidRequest(format!("invalid page number: {}", raw)))
}

/// Response to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub actions: Vec<SelectableAction>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    /// Text followed by one line per action with its callback payload.
    ///
    /// An action whose payload cannot be encoded is left out.
    pub fn render(&self) -> String {
        let mut out = self.text.clone();
        for action in &self.actions {
            match action.callback.encode() {
                Ok(payload) => out.push_str(&format!("\n[{}] callback {}", action.label, payload)),
                Err(e) => {
                    tracing::warn!(label = %action.label, error = %e, "Dropping unencodable action");
                }
            }
        }
        out
    }
}

/// Dispatches requests to the registry and triggers peer updates.
pub struct CommandHandler {
    registry: Arc<CategoryRegistry>,
    publisher: Option<Arc<SnapshotPublisher>>,
}

impl CommandHandler {
    pub fn new(registry: Arc<CategoryRegistry>) -> Self {
        Self {
            registry,
            publisher: None,
        }
    }

    /// Publish a snapshot after every committed mutation.
    pub fn with_publisher(mut self, publisher: Arc<SnapshotPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Parse and handle one line. Errors become reply text.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let request = match Request::parse_line(line) {
            Ok(request) => request,
            Err(e) => {
                e.log_with_context(&ErrorContext::new("parse_line"));
                return Reply::text(error_text(&e));
            }
        };

        let context = request.context();
        match self.handle(request).await {
            Ok(reply) => reply,
            Err(e) => {
                e.log_with_context(&context);
                Reply::text(error_text(&e))
            }
        }
    }

    /// Handle a parsed request.
    pub async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Add { category, pattern } => {
                let outcome = self.registry.add(category, &pattern).await?;
                let actions = match &outcome {
                    AddOutcome::PendingDecision { token, .. } => SelectableAction::for_pending(token),
                    _ => Vec::new(),
                };
                Ok(self.finish(MutationReport::from_add(category, &pattern, &outcome), actions))
            }
            Request::Remove { category, pattern } => {
                let outcome = self.registry.remove(category, &pattern).await?;
                Ok(self.finish(
                    MutationReport::from_remove(category, &pattern, &outcome),
                    Vec::new(),
                ))
            }
            Request::Resolve { token, decision } => {
                let outcome = self.registry.resolve(&token, decision).await?;
                let actions = match &outcome {
                    ResolveOutcome::NotApplied { token, .. } => SelectableAction::for_pending(token),
                    _ => Vec::new(),
                };
                Ok(self.finish(MutationReport::from_resolve(&outcome), actions))
            }
            Request::List { category, page } => {
                let listing = self.registry.list(category, page).await?;
                let (text, _) = render_listing(category, &listing);
                let actions = match &listing {
                    Listing::Page(page) => listing_actions(category, page),
                    Listing::Empty => Vec::new(),
                };
                Ok(Reply { text, actions })
            }
            Request::Help => Ok(Reply::text(HELP_TEXT)),
            Request::Noop => Ok(Reply::text("")),
        }
    }

    fn finish(&self, report: MutationReport, actions: Vec<SelectableAction>) -> Reply {
        if report.is_committed() {
            if let Some(publisher) = &self.publisher {
                publisher.spawn_publish();
            }
        }

        Reply {
            text: render_report(&report),
            actions,
        }
    }
}

/// Requester-facing text for an error.
fn error_text(error: &WardenError) -> String {
    match error {
        WardenError::UnknownCategory(_)
        | WardenError::InvalidPage { .. }
        | WardenError::InvalidRequest(_) => error.to_string(),
        _ => error.user_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::publish::{ExchangeMessage, PublishSettings, Transport, UpdateMode};
    use crate::storage::MemoryStorage;

    fn registry() -> Arc<CategoryRegistry> {
        Arc::new(
            CategoryRegistry::new(Category::all(), Arc::new(MemoryStorage::new()))
                .expect("registry should build"),
        )
    }

    #[derive(Default)]
    struct CountingTransport {
        notices: Mutex<Vec<ExchangeMessage>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send_notice(&self, _recipients: &[String], message: &ExchangeMessage) -> Result<()> {
            self.notices.lock().expect("lock").push(message.clone());
            Ok(())
        }

        async fn send_artifact(
            &self,
            _recipients: &[String],
            _path: &Path,
            _caption: &ExchangeMessage,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parse_add_keeps_spaces_in_pattern() {
        assert_eq!(
            Request::parse_line("add spam  cheap followers now ").unwrap(),
            Request::Add {
                category: Category::Spam,
                pattern: "cheap followers now".to_string()
            }
        );
    }

    #[test]
    fn parse_list_defaults_to_first_page() {
        assert_eq!(
            Request::parse_line("list bad").unwrap(),
            Request::List {
                category: Category::Bad,
                page: 1
            }
        );
        assert_eq!(
            Request::parse_line("LIST bad 3").unwrap(),
            Request::List {
                category: Category::Bad,
                page: 3
            }
        );
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert!(matches!(
            Request::parse_line("add bad"),
            Err(WardenError::InvalidRequest(_))
        ));
        assert!(matches!(
            Request::parse_line("add nsfw foo"),
            Err(WardenError::UnknownCategory(_))
        ));
        assert!(matches!(
            Request::parse_line("list bad two"),
            Err(WardenError::InvalidRequest(_))
        ));
        assert!(matches!(
            Request::parse_line("shout bad"),
            Err(WardenError::InvalidRequest(_))
        ));
    }

    #[test]
    fn pending_actions_parse_back_into_requests() {
        for action in SelectableAction::for_pending("Ab3dEf9h") {
            let line = format!("callback {}", action.callback.encode().unwrap());
            let Request::Resolve { token, .. } = Request::parse_line(&line).unwrap() else {
                panic!("expected resolve");
            };
            assert_eq!(token, "Ab3dEf9h");
        }
    }

    #[test]
    fn list_callback_parses() {
        let data = CallbackData::decode(r#"{"a":"list","t":"spam","d":2}"#).unwrap();
        assert_eq!(
            Request::from_callback(&data).unwrap(),
            Request::List {
                category: Category::Spam,
                page: 2
            }
        );

        let none = CallbackData::new("none", None, None);
        assert_eq!(Request::from_callback(&none).unwrap(), Request::Noop);
    }

    #[tokio::test]
    async fn conflicting_add_offers_decisions() {
        let handler = CommandHandler::new(registry());

        let added = handler.handle_line("add bad foo").await;
        assert!(added.text.starts_with("Status: added"));
        assert!(added.actions.is_empty());

        let pending = handler.handle_line("add bad fo+").await;
        assert!(pending.text.starts_with("Status: awaiting confirmation"));
        assert!(pending.text.contains("  - foo"));
        assert_eq!(pending.actions.len(), 3);

        let replace = &pending.actions[1];
        let line = format!("callback {}", replace.callback.encode().unwrap());
        let resolved = handler.handle_line(&line).await;
        assert!(resolved.text.contains("Replaced:\n  - foo"));

        let again = handler.handle_line(&line).await;
        assert!(again.text.starts_with("Status: expired"));
    }

    #[test]
    fn list_callback_rejects_unusable_pages() {
        let missing = CallbackData::decode(r#"{"a":"list","t":"spam","d":"two"}"#).unwrap();
        assert!(matches!(
            Request::from_callback(&missing),
            Err(WardenError::InvalidRequest(_))
        ));

        // Never wraps to a smaller page
        let huge = CallbackData::new("list", Some("spam"), Some(serde_json::json!(u64::MAX)));
        match Request::from_callback(&huge) {
            Ok(Request::List { page, .. }) => assert_eq!(page as u64, u64::MAX),
            Ok(other) => panic!("unexpected request {:?}", other),
            Err(e) => assert!(matches!(e, WardenError::InvalidRequest(_))),
        }
    }

    #[tokio::test]
    async fn refused_decision_offers_choices_again() {
        let registry = Arc::new(
            CategoryRegistry::new(Category::all(), Arc::new(MemoryStorage::new()))
                .expect("registry should build")
                .with_matcher_size_limit(10_000),
        );
        let handler = CommandHandler::new(registry);

        assert_eq!(
            handler.handle_line(r"add bad zq\w+").await.text,
            "Status: not added\nCategory: Bad content\nPattern: zq\\w+\nReason: category is full"
        );

        handler.handle_line("add bad foo").await;
        let pending = handler.handle_line(r"add bad fo+\w*").await;
        assert_eq!(pending.actions.len(), 3);

        let line = format!("callback {}", pending.actions[0].callback.encode().unwrap());
        let refused = handler.handle_line(&line).await;
        assert!(refused.text.starts_with("Status: not added"));
        assert!(refused.text.contains("Reason: category is full"));
        assert_eq!(refused.actions, pending.actions);
    }

    #[tokio::test]
    async fn list_reply_offers_navigation() {
        let registry = Arc::new(
            CategoryRegistry::new(Category::all(), Arc::new(MemoryStorage::new()))
                .expect("registry should build")
                .with_page_size(2),
        );
        for i in 0..3 {
            registry
                .add(Category::Watch, &format!("watch-{}-x", i))
                .await
                .unwrap();
        }
        let handler = CommandHandler::new(registry);

        let reply = handler.handle_line("list watch").await;
        assert!(reply.text.contains("Page 1/2 (3 patterns)"));
        let labels: Vec<_> = reply.actions.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["Page 1", ">>"]);

        let out_of_range = handler.handle_line("list watch 5").await;
        assert_eq!(out_of_range.text, "Page 5 out of range (1..=2)");
    }

    #[tokio::test]
    async fn empty_listing_reply() {
        let handler = CommandHandler::new(registry());
        let reply = handler.handle_line("list contact").await;
        assert_eq!(reply.text, "Category: Contact info\nNo results");
        assert!(reply.actions.is_empty());
    }

    #[tokio::test]
    async fn committed_mutations_trigger_publish() {
        let registry = registry();
        let transport = Arc::new(CountingTransport::default());
        let dir = tempfile::tempdir().expect("temp dir");
        let publisher = Arc::new(SnapshotPublisher::new(
            registry.clone(),
            transport.clone(),
            PublishSettings {
                sender: "REGEX".to_string(),
                recipients: vec!["NOSPAM".to_string()],
                mode: UpdateMode::Reload,
                reload_path: "data/compiled".to_string(),
                staging_dir: dir.path().to_path_buf(),
                delay: Duration::ZERO,
            },
        ));
        let handler = CommandHandler::new(registry).with_publisher(publisher);

        handler.handle_line("add spam promo-code").await;
        handler.handle_line("add spam promo-code").await;
        handler.handle_line("remove spam nothing-here").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.notices.lock().expect("lock").len(), 1);

        handler.handle_line("remove spam promo-code").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.notices.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn errors_become_reply_text() {
        let handler = CommandHandler::new(registry());
        assert_eq!(
            handler.handle_line("add nsfw foo").await.text,
            "Unknown category: nsfw"
        );
        assert!(handler.handle_line("help").await.text.starts_with("Commands:"));
    }

    #[test]
    fn reply_render_lists_actions() {
        let reply = Reply {
            text: "Status: awaiting confirmation".to_string(),
            actions: SelectableAction::for_pending("Ab3dEf9h")
                .into_iter()
                .take(1)
                .collect(),
        };
        assert_eq!(
            reply.render(),
            "Status: awaiting confirmation\n[add-new] callback {\"a\":\"ask\",\"t\":\"new\",\"d\":\"Ab3dEf9h\"}"
        );
    }
}

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any pattern text after the category survives line parsing intact.
        #[test]
        fn prop_add_line_round_trip(pattern in "[a-z0-9+*.]{1,10}( [a-z0-9+*.]{1,10}){0,3}") {
            let line = format!("add bad {}", pattern);
            prop_assert_eq!(
                Request::parse_line(&line).expect("valid line"),
                Request::Add { category: Category::Bad, pattern }
            );
        }
    }
}
