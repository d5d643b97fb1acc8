//! Turn orchestration.
//!
//! One synchronous path per turn: resolve the conversation, gate on
//! credits, compact history, call the provider, return the reply. The
//! persistence phase (transcript append, graph patch, preference and
//! title updates) runs as a fire-and-forget background task, so caller
//! latency is bounded by the generation call only.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use sage_core::constants::TURN_COST;
use sage_core::conversation::{Conversation, ConversationSummary};
use sage_core::graph::{GraphHistory, GraphModification};
use sage_core::messages::{ChatMessage, Role};
use sage_core::user::{CreditBalance, SubscriptionPlan, SubscriptionStatus};
use sage_llm::{ImageAttachment, Provider, StructuredRequest, StructuredTurn};
use sage_store::DocumentStore;

use crate::branch::BranchManager;
use crate::compactor::HistoryCompactor;
use crate::credits::CreditLedger;
use crate::errors::{Result, RuntimeError};
use crate::graph_patch::GraphPatchEngine;
use crate::prompts;

/// One turn request.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Calling user.
    pub uid: String,
    /// Conversation to continue; absent or unknown ids start a new one.
    pub conversation_id: Option<String>,
    /// New messages to merge into the transcript.
    pub messages: Vec<ChatMessage>,
    /// Interaction mode passed through to the system prompt.
    pub mode: String,
    /// Optional image attached to the final user message.
    pub image: Option<ImageAttachment>,
}

/// The synchronous half of a turn.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    /// Assistant reply text.
    pub reply: String,
    /// Conversation the turn was recorded against.
    pub conversation_id: String,
}

/// Composes ledger, compactor, branches, store, and provider into turns.
pub struct TurnOrchestrator {
    store: Arc<DocumentStore>,
    provider: Arc<dyn Provider>,
    ledger: CreditLedger,
    compactor: HistoryCompactor,
    branches: BranchManager,
    turn_cost: i64,
}

impl TurnOrchestrator {
    /// New orchestrator with default compaction limits and turn cost.
    #[must_use]
    pub fn new(store: Arc<DocumentStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            ledger: CreditLedger::new(Arc::clone(&store)),
            branches: BranchManager::new(Arc::clone(&store)),
            compactor: HistoryCompactor::default(),
            store,
            provider,
            turn_cost: TURN_COST,
        }
    }

    /// Replace the compactor (tests, provider-specific budgets).
    #[must_use]
    pub fn with_compactor(mut self, compactor: HistoryCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    /// Run one chat turn and return the reply synchronously.
    #[instrument(skip(self, req), fields(uid = %req.uid))]
    pub async fn turn(&self, req: TurnRequest) -> Result<TurnReply> {
        counter!("sage_turns_total").increment(1);
        let user = self.store.get_user(&req.uid)?;

        // Resolve or create. An unknown or foreign id mints a fresh
        // conversation rather than erroring.
        let existing = match &req.conversation_id {
            Some(id) => self
                .store
                .try_get_conversation(id)?
                .filter(|c| c.owner_uid == req.uid),
            None => None,
        };
        let (conversation, is_new) = match existing {
            Some(conv) => (conv, false),
            None => {
                let conv = Conversation::new(req.uid.as_str());
                self.store.create_conversation(&conv)?;
                debug!(conversation = %conv.id, "minted new conversation");
                (conv, true)
            }
        };

        let mut working = conversation.messages.clone();
        working.extend(req.messages.iter().cloned());

        let system = prompts::render_system(&user, &req.mode);

        // The credit gate is the only blocking check before generation.
        if !self.ledger.deduct(&req.uid, self.turn_cost) {
            counter!("sage_turns_rejected_total").increment(1);
            return Err(RuntimeError::InsufficientCredits);
        }

        let payload = self
            .compactor
            .prepare(working.clone(), self.provider.as_ref())
            .await;

        let outcome = self
            .provider
            .complete_structured(&StructuredRequest {
                system,
                messages: payload,
                image: req.image,
            })
            .await;
        let turn = match outcome {
            Ok(turn) => turn,
            Err(err) => {
                warn!(%err, "provider failed; degrading to apologetic reply");
                counter!("sage_provider_failures_total").increment(1);
                StructuredTurn {
                    reply: format!(
                        "Sorry, something went wrong while generating a response: {err}"
                    ),
                    updated_preferences: None,
                    modification: GraphModification::default(),
                }
            }
        };

        // Reply goes back now; persistence is deferred and eventual.
        let reply = TurnReply {
            reply: turn.reply.clone(),
            conversation_id: conversation.id.clone(),
        };
        self.spawn_persistence(conversation, is_new, working, turn);
        Ok(reply)
    }

    /// Edit an earlier message: fork, then run the normal turn path
    /// seeded with the copied prefix.
    pub async fn edit(
        &self,
        conversation_id: &str,
        message_index: usize,
        new_content: &str,
    ) -> Result<TurnReply> {
        let branch = self.branches.fork(conversation_id, message_index, new_content)?;
        self.turn(TurnRequest {
            uid: branch.owner_uid.clone(),
            conversation_id: Some(branch.id),
            messages: Vec::new(),
            mode: prompts::DEFAULT_MODE.to_owned(),
            image: None,
        })
        .await
    }

    /// Background persistence for a completed turn. Failures here are
    /// logged only; the caller already holds its reply.
    fn spawn_persistence(
        &self,
        conversation: Conversation,
        is_new: bool,
        mut messages: Vec<ChatMessage>,
        turn: StructuredTurn,
    ) {
        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        let uid = conversation.owner_uid;
        let conv_id = conversation.id;
        let first_user_message = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());

        let _task = tokio::spawn(async move {
            messages.push(ChatMessage::assistant(turn.reply));
            if let Err(err) = store.set_messages(&conv_id, &messages) {
                warn!(%err, conversation = %conv_id, "failed to persist transcript");
            }

            if !turn.modification.is_empty() {
                let patched = store.with_graph_history(&uid, |history| {
                    GraphPatchEngine::apply(history, &turn.modification);
                });
                if let Err(err) = patched {
                    warn!(%err, %uid, "failed to persist graph history");
                }
            }

            if let Some(preferences) = turn.updated_preferences {
                if let Err(err) = store.set_preferences(&uid, &preferences) {
                    warn!(%err, %uid, "failed to persist preferences");
                }
            }

            // One-shot, best-effort: a failure leaves the placeholder.
            if is_new {
                if let Some(first) = first_user_message {
                    match provider.complete_text(&prompts::title_request(&first)).await {
                        Ok(title) if !title.trim().is_empty() => {
                            if let Err(err) = store.set_title(&conv_id, title.trim()) {
                                debug!(%err, conversation = %conv_id, "failed to persist title");
                            } else {
                                info!(conversation = %conv_id, "generated conversation title");
                            }
                        }
                        Ok(_) => debug!(conversation = %conv_id, "empty generated title; keeping placeholder"),
                        Err(err) => {
                            debug!(%err, conversation = %conv_id, "title generation failed; keeping placeholder");
                        }
                    }
                }
            }
        });
    }

    // ── Read surface and billing passthrough ────────────────────────────

    /// Top-level conversations for an owner.
    pub fn list_conversations(&self, owner_uid: &str) -> Result<Vec<ConversationSummary>> {
        self.branches.list(owner_uid)
    }

    /// One conversation plus its immediate children, access-checked.
    pub fn get_conversation(
        &self,
        conversation_id: &str,
        caller: Option<&str>,
    ) -> Result<(Conversation, Vec<Conversation>)> {
        self.branches.get(conversation_id, caller)
    }

    /// The user's full graph history.
    pub fn get_graph_history(&self, uid: &str) -> Result<GraphHistory> {
        Ok(self.store.graph_history(uid)?)
    }

    /// Current credit balance snapshot.
    pub fn get_balance(&self, uid: &str) -> Result<CreditBalance> {
        self.ledger.get_balance(uid)
    }

    /// Billing hook: purchase-completed credit grant.
    pub fn add_credits(&self, uid: &str, amount: i64) -> Result<()> {
        self.ledger.add_credits(uid, amount)
    }

    /// Billing hook: subscription lifecycle transition.
    pub fn set_subscription(
        &self,
        uid: &str,
        plan: Option<SubscriptionPlan>,
        status: Option<SubscriptionStatus>,
        expires: Option<&str>,
    ) -> Result<()> {
        Ok(self.store.set_subscription(uid, plan, status, expires)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sage_core::constants::DEFAULT_CONVERSATION_TITLE;
    use sage_llm::{ProviderError, ProviderResult, TextRequest};

    /// Scripted provider: pops queued responses, errors when unscripted.
    #[derive(Default)]
    struct FakeProvider {
        structured: Mutex<VecDeque<ProviderResult<StructuredTurn>>>,
        text: Mutex<VecDeque<ProviderResult<String>>>,
        structured_calls: AtomicUsize,
    }

    impl FakeProvider {
        fn push_structured(&self, result: ProviderResult<StructuredTurn>) {
            self.structured.lock().push_back(result);
        }

        fn push_text(&self, result: ProviderResult<String>) {
            self.text.lock().push_back(result);
        }

        fn reply(content: &str) -> StructuredTurn {
            StructuredTurn {
                reply: content.into(),
                ..StructuredTurn::default()
            }
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn complete_structured(
            &self,
            _req: &StructuredRequest,
        ) -> ProviderResult<StructuredTurn> {
            self.structured_calls.fetch_add(1, Ordering::SeqCst);
            self.structured
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::MalformedOutput("unscripted".into())))
        }

        async fn complete_text(&self, _req: &TextRequest) -> ProviderResult<String> {
            self.text
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::MalformedOutput("unscripted".into())))
        }

        fn model(&self) -> &str {
            "fake"
        }
    }

    fn setup() -> (Arc<DocumentStore>, Arc<FakeProvider>, TurnOrchestrator) {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        store.create_user("u1", "Ada", None).unwrap();
        store.add_credits("u1", 100).unwrap();
        let provider = Arc::new(FakeProvider::default());
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&provider) as Arc<dyn Provider>,
        );
        (store, provider, orchestrator)
    }

    fn request(conversation_id: Option<String>, content: &str) -> TurnRequest {
        TurnRequest {
            uid: "u1".into(),
            conversation_id,
            messages: vec![ChatMessage::user(content)],
            mode: prompts::DEFAULT_MODE.into(),
            image: None,
        }
    }

    /// Poll until the background persistence phase satisfies `check`.
    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("background persistence did not complete in time");
    }

    #[tokio::test]
    async fn new_turn_persists_transcript_and_side_channels() {
        let (store, provider, orchestrator) = setup();
        provider.push_structured(Ok(StructuredTurn {
            reply: "Hello!".into(),
            updated_preferences: Some("likes tea".into()),
            modification: GraphModification {
                add_nodes: vec!["Alice".into()],
                ..GraphModification::default()
            },
        }));
        provider.push_text(Ok("Tea Chat".into()));

        let reply = orchestrator.turn(request(None, "hi")).await.unwrap();
        assert_eq!(reply.reply, "Hello!");
        assert!(reply.conversation_id.starts_with("conv_"));

        let conv_id = reply.conversation_id.clone();
        wait_for(|| {
            store
                .get_conversation(&conv_id)
                .is_ok_and(|c| c.messages.len() == 2 && c.title != DEFAULT_CONVERSATION_TITLE)
        })
        .await;

        let conv = store.get_conversation(&conv_id).unwrap();
        assert_eq!(conv.messages[0].content, "hi");
        assert_eq!(conv.messages[1].role, Role::Assistant);
        assert_eq!(conv.messages[1].content, "Hello!");
        assert_eq!(conv.title, "Tea Chat");

        let history = store.graph_history("u1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.current().unwrap().nodes[0].label, "Alice");
        assert_eq!(history.current().unwrap().nodes[0].id, "1");

        assert_eq!(store.get_user("u1").unwrap().preferences, "likes tea");
    }

    #[tokio::test]
    async fn continuing_turn_appends_without_retitling() {
        let (store, provider, orchestrator) = setup();
        let mut conv = Conversation::new("u1");
        conv.messages = vec![ChatMessage::user("u0"), ChatMessage::assistant("a0")];
        store.create_conversation(&conv).unwrap();

        provider.push_structured(Ok(FakeProvider::reply("a1")));
        let reply = orchestrator
            .turn(request(Some(conv.id.clone()), "u1 says more"))
            .await
            .unwrap();
        assert_eq!(reply.conversation_id, conv.id);

        wait_for(|| {
            store
                .get_conversation(&conv.id)
                .is_ok_and(|c| c.messages.len() == 4)
        })
        .await;

        let reloaded = store.get_conversation(&conv.id).unwrap();
        assert_eq!(reloaded.messages[2].content, "u1 says more");
        assert_eq!(reloaded.messages[3].content, "a1");
        // No title generation for continuing conversations.
        assert_eq!(reloaded.title, DEFAULT_CONVERSATION_TITLE);
    }

    #[tokio::test]
    async fn unknown_conversation_id_mints_a_fresh_one() {
        let (_, provider, orchestrator) = setup();
        provider.push_structured(Ok(FakeProvider::reply("hi")));

        let reply = orchestrator
            .turn(request(Some("conv_ghost".into()), "hello"))
            .await
            .unwrap();
        assert_ne!(reply.conversation_id, "conv_ghost");
    }

    #[tokio::test]
    async fn insufficient_credits_aborts_before_the_provider() {
        let (store, provider, orchestrator) = setup();
        store.create_user("broke", "Bob", None).unwrap();

        let result = orchestrator
            .turn(TurnRequest {
                uid: "broke".into(),
                conversation_id: None,
                messages: vec![ChatMessage::user("hi")],
                mode: prompts::DEFAULT_MODE.into(),
                image: None,
            })
            .await;

        assert_matches!(result, Err(RuntimeError::InsufficientCredits));
        assert_eq!(provider.structured_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn each_turn_costs_one_credit() {
        let (store, provider, orchestrator) = setup();
        provider.push_structured(Ok(FakeProvider::reply("hi")));

        orchestrator.turn(request(None, "hello")).await.unwrap();
        assert_eq!(store.get_user("u1").unwrap().credits, 99);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_apology_and_still_persists() {
        let (store, provider, orchestrator) = setup();
        provider.push_structured(Err(ProviderError::Api {
            status: 500,
            message: "upstream exploded".into(),
        }));

        let reply = orchestrator.turn(request(None, "hi")).await.unwrap();
        assert!(
            reply
                .reply
                .starts_with("Sorry, something went wrong while generating a response:")
        );
        assert!(reply.reply.contains("upstream exploded"));

        let conv_id = reply.conversation_id.clone();
        wait_for(|| {
            store
                .get_conversation(&conv_id)
                .is_ok_and(|c| c.messages.len() == 2)
        })
        .await;
        let conv = store.get_conversation(&conv_id).unwrap();
        assert_eq!(conv.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn edit_forks_and_generates_on_the_branch() {
        let (store, provider, orchestrator) = setup();
        let mut conv = Conversation::new("u1");
        conv.messages = vec![
            ChatMessage::user("u0"),
            ChatMessage::assistant("a0"),
            ChatMessage::user("u1"),
        ];
        store.create_conversation(&conv).unwrap();

        provider.push_structured(Ok(FakeProvider::reply("fresh take")));
        let reply = orchestrator.edit(&conv.id, 1, "X").await.unwrap();
        assert_eq!(reply.reply, "fresh take");
        assert_ne!(reply.conversation_id, conv.id);

        let branch_id = reply.conversation_id.clone();
        wait_for(|| {
            store
                .get_conversation(&branch_id)
                .is_ok_and(|c| c.messages.len() == 3)
        })
        .await;

        let branch = store.get_conversation(&branch_id).unwrap();
        assert_eq!(branch.messages[0].content, "u0");
        assert_eq!(branch.messages[1].content, "X");
        assert_eq!(branch.messages[2].content, "fresh take");
        assert_eq!(branch.parent_conversation_id.as_deref(), Some(conv.id.as_str()));
        assert_eq!(branch.branch_from_message_index, Some(1));

        let parent = store.get_conversation(&conv.id).unwrap();
        assert_eq!(parent.children_branches.len(), 1);
        assert_eq!(parent.children_branches[0].id, branch_id);
    }

    #[tokio::test]
    async fn graph_history_grows_once_per_modifying_turn() {
        let (store, provider, orchestrator) = setup();
        for label in ["Alice", "Bob"] {
            provider.push_structured(Ok(StructuredTurn {
                reply: "ok".into(),
                updated_preferences: None,
                modification: GraphModification {
                    add_nodes: vec![label.into()],
                    ..GraphModification::default()
                },
            }));
        }

        let first = orchestrator.turn(request(None, "hi")).await.unwrap();
        wait_for(|| store.graph_history("u1").is_ok_and(|h| h.len() == 1)).await;

        orchestrator
            .turn(request(Some(first.conversation_id), "again"))
            .await
            .unwrap();
        wait_for(|| store.graph_history("u1").is_ok_and(|h| h.len() == 2)).await;

        let history = orchestrator.get_graph_history("u1").unwrap();
        assert_eq!(history.current_index, 1);
        assert_eq!(history.current().unwrap().nodes.len(), 2);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (_, _, orchestrator) = setup();
        let result = orchestrator.turn(request(None, "hi")).await;
        assert!(result.is_ok());

        let result = orchestrator
            .turn(TurnRequest {
                uid: "ghost".into(),
                conversation_id: None,
                messages: vec![],
                mode: prompts::DEFAULT_MODE.into(),
                image: None,
            })
            .await;
        assert_matches!(result, Err(RuntimeError::NotFound(_)));
    }
}
