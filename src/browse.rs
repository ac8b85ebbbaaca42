//! 候选浏览：逐个展示资料，每个资料做一次喜欢/跳过决定。

use crate::api::ProfileApi;
use crate::request::HttpClient;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use tracing::{debug, info, warn};
use unimatch_shared::protocol::MatchPreferences;
use unimatch_shared::{CANDIDATE_PAGE_SIZE, Match, Profile};

// =========================================================
// 状态机 (State Machine)
// =========================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Like,
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowsePhase {
    /// 尚未拉取，或上次拉取失败
    Idle,
    Loading { request: u64 },
    Ready,
    Deciding { candidate_id: String, decision: Decision },
    /// 拉取结果为空，只有 `Refresh` 能离开该阶段
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowseState {
    viewer_id: String,
    pub queue: VecDeque<Profile>,
    pub phase: BrowsePhase,
    pub error: Option<String>,
    decided: HashSet<String>,
    requests: u64,
}

impl BrowseState {
    pub fn new(viewer_id: impl Into<String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            queue: VecDeque::new(),
            phase: BrowsePhase::Idle,
            error: None,
            decided: HashSet::new(),
            requests: 0,
        }
    }

    pub fn current(&self) -> Option<&Profile> {
        self.queue.front()
    }

    pub fn accepts_input(&self) -> bool {
        self.phase == BrowsePhase::Ready && !self.queue.is_empty()
    }

    pub fn has_decided(&self, user_id: &str) -> bool {
        self.decided.contains(user_id)
    }

    /// 按服务端顺序保留可用候选，最多一页
    fn admit(&self, candidates: Vec<Profile>) -> VecDeque<Profile> {
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|p| p.id != self.viewer_id)
            .filter(|p| p.profile_completed && p.is_active)
            .filter(|p| !self.decided.contains(&p.id))
            .filter(|p| seen.insert(p.id.clone()))
            .take(CANDIDATE_PAGE_SIZE)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowseEvent {
    Refresh,
    Loaded { request: u64, candidates: Vec<Profile> },
    LoadFailed { request: u64, message: String },
    Decide(Decision),
    Decided {
        candidate_id: String,
        is_match: bool,
        created_match: Option<Match>,
    },
    DecideFailed { candidate_id: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowseEffect {
    FetchCandidates { request: u64, limit: usize },
    SendDecision { candidate_id: String, decision: Decision },
    /// 返回给调用方；只有喜欢操作才可能带 `is_match`
    Recorded {
        candidate: Profile,
        decision: Decision,
        is_match: bool,
        created_match: Option<Match>,
    },
}

pub fn transition(state: &BrowseState, event: BrowseEvent) -> (BrowseState, Vec<BrowseEffect>) {
    let mut next = state.clone();

    match (&state.phase, event) {
        // 决策进行中不允许刷新队列
        (BrowsePhase::Deciding { .. }, BrowseEvent::Refresh) => (next, Vec::new()),
        (_, BrowseEvent::Refresh) => {
            next.requests += 1;
            next.phase = BrowsePhase::Loading {
                request: next.requests,
            };
            next.queue.clear();
            next.error = None;
            let effect = BrowseEffect::FetchCandidates {
                request: next.requests,
                limit: CANDIDATE_PAGE_SIZE,
            };
            (next, vec![effect])
        }

        (BrowsePhase::Loading { request }, BrowseEvent::Loaded { request: got, candidates })
            if *request == got =>
        {
            next.queue = state.admit(candidates);
            next.phase = if next.queue.is_empty() {
                BrowsePhase::Exhausted
            } else {
                BrowsePhase::Ready
            };
            (next, Vec::new())
        }
        (BrowsePhase::Loading { request }, BrowseEvent::LoadFailed { request: got, message })
            if *request == got =>
        {
            next.phase = BrowsePhase::Idle;
            next.error = Some(message);
            (next, Vec::new())
        }

        (BrowsePhase::Ready, BrowseEvent::Decide(decision)) => match state.queue.front() {
            Some(head) => {
                next.phase = BrowsePhase::Deciding {
                    candidate_id: head.id.clone(),
                    decision,
                };
                next.error = None;
                let effect = BrowseEffect::SendDecision {
                    candidate_id: head.id.clone(),
                    decision,
                };
                (next, vec![effect])
            }
            None => (next, Vec::new()),
        },

        (
            BrowsePhase::Deciding {
                candidate_id,
                decision,
            },
            BrowseEvent::Decided {
                candidate_id: got,
                is_match,
                created_match,
            },
        ) if *candidate_id == got => {
            let Some(candidate) = next.queue.pop_front() else {
                next.phase = BrowsePhase::Exhausted;
                return (next, Vec::new());
            };
            next.decided.insert(candidate.id.clone());
            next.phase = if next.queue.is_empty() {
                BrowsePhase::Exhausted
            } else {
                BrowsePhase::Ready
            };
            let is_match = is_match && *decision == Decision::Like;
            let effect = BrowseEffect::Recorded {
                candidate,
                decision: *decision,
                is_match,
                created_match: created_match.filter(|_| is_match),
            };
            (next, vec![effect])
        }
        (
            BrowsePhase::Deciding { candidate_id, .. },
            BrowseEvent::DecideFailed {
                candidate_id: got,
                message,
            },
        ) if *candidate_id == got => {
            next.phase = BrowsePhase::Ready;
            next.error = Some(message);
            (next, Vec::new())
        }

        // 过期响应或不合时宜的输入
        _ => (next, Vec::new()),
    }
}

// =========================================================
// 异步驱动 (Driver)
// =========================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// 队列为空，或已有决定在处理中
    Ignored,
    Recorded {
        candidate: Profile,
        is_match: bool,
        created_match: Option<Match>,
    },
    Failed(String),
}

pub struct MatchWorkflow<C> {
    api: Rc<ProfileApi<C>>,
    state: RefCell<BrowseState>,
    preferences: RefCell<MatchPreferences>,
}

impl<C: HttpClient> MatchWorkflow<C> {
    pub fn new(api: Rc<ProfileApi<C>>, viewer_id: &str) -> Self {
        Self {
            api,
            state: RefCell::new(BrowseState::new(viewer_id)),
            preferences: RefCell::new(MatchPreferences::default()),
        }
    }

    pub fn set_preferences(&self, preferences: MatchPreferences) {
        *self.preferences.borrow_mut() = preferences;
    }

    pub fn state(&self) -> BrowseState {
        self.state.borrow().clone()
    }

    pub fn current(&self) -> Option<Profile> {
        self.state.borrow().current().cloned()
    }

    /// 重新拉取候选队列
    pub async fn refresh(&self) -> BrowseState {
        self.dispatch(BrowseEvent::Refresh).await;
        self.state()
    }

    pub async fn like(&self) -> DecisionOutcome {
        self.decide(Decision::Like).await
    }

    pub async fn pass(&self) -> DecisionOutcome {
        self.decide(Decision::Pass).await
    }

    pub async fn decide(&self, decision: Decision) -> DecisionOutcome {
        let reports = self.dispatch(BrowseEvent::Decide(decision)).await;

        if let Some(BrowseEffect::Recorded {
            candidate,
            is_match,
            created_match,
            ..
        }) = reports.into_iter().next()
        {
            return DecisionOutcome::Recorded {
                candidate,
                is_match,
                created_match,
            };
        }

        let state = self.state.borrow();
        match (&state.phase, &state.error) {
            (BrowsePhase::Ready, Some(message)) => DecisionOutcome::Failed(message.clone()),
            _ => DecisionOutcome::Ignored,
        }
    }

    /// 执行事件及其引发的所有后续事件，返回 `Recorded` 结果
    async fn dispatch(&self, event: BrowseEvent) -> Vec<BrowseEffect> {
        let mut queue = VecDeque::from([event]);
        let mut reports = Vec::new();

        while let Some(event) = queue.pop_front() {
            let (next, effects) = transition(&self.state.borrow(), event);
            *self.state.borrow_mut() = next;

            for effect in effects {
                match effect {
                    BrowseEffect::FetchCandidates { request, limit } => {
                        let preferences = self.preferences.borrow().clone();
                        queue.push_back(match self.api.potential_matches(limit, &preferences).await {
                            Ok(candidates) => {
                                debug!(count = candidates.len(), "candidates fetched");
                                BrowseEvent::Loaded {
                                    request,
                                    candidates,
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "loading candidates failed");
                                BrowseEvent::LoadFailed {
                                    request,
                                    message: err.to_string(),
                                }
                            }
                        });
                    }
                    BrowseEffect::SendDecision {
                        candidate_id,
                        decision,
                    } => {
                        let result = match decision {
                            Decision::Like => self.api.like(&candidate_id).await,
                            Decision::Pass => {
                                self.api.pass(&candidate_id).await.map(|_| Default::default())
                            }
                        };
                        queue.push_back(match result {
                            Ok(outcome) => BrowseEvent::Decided {
                                candidate_id,
                                is_match: outcome.is_match,
                                created_match: outcome.created_match,
                            },
                            Err(err) => {
                                warn!(candidate = %candidate_id, error = %err, "decision failed");
                                BrowseEvent::DecideFailed {
                                    candidate_id,
                                    message: err.to_string(),
                                }
                            }
                        });
                    }
                    recorded @ BrowseEffect::Recorded { .. } => {
                        if let BrowseEffect::Recorded {
                            candidate,
                            is_match: true,
                            ..
                        } = &recorded
                        {
                            info!(candidate = %candidate.id, "it's a match");
                        }
                        reports.push(recorded);
                    }
                }
            }
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityProvider;
    use crate::request::HttpMethod;
    use crate::testing::{API_BASE, FakeBackend, FakeIdentity};
    use unimatch_shared::protocol::{ApiRequest, LikeRequest, PassRequest};

    fn candidate(id: &str) -> Profile {
        let mut p = Profile::new(id);
        p.first_name = id.to_uppercase();
        p.profile_completed = true;
        p
    }

    fn ready(viewer: &str, ids: &[&str]) -> BrowseState {
        let mut state = BrowseState::new(viewer);
        state.queue = ids.iter().map(|id| candidate(id)).collect();
        state.phase = BrowsePhase::Ready;
        state
    }

    // ---------------------------------------------------------
    // transition()
    // ---------------------------------------------------------

    #[test]
    fn test_loaded_candidates_are_filtered_and_capped() {
        let state = BrowseState::new("me");
        let (state, effects) = transition(&state, BrowseEvent::Refresh);
        assert_eq!(
            effects,
            vec![BrowseEffect::FetchCandidates {
                request: 1,
                limit: 10
            }]
        );

        let mut incomplete = candidate("incomplete");
        incomplete.profile_completed = false;
        let mut inactive = candidate("inactive");
        inactive.is_active = false;

        let mut batch = vec![candidate("me"), incomplete, inactive, candidate("c0"), candidate("c0")];
        batch.extend((1..=12).map(|i| candidate(&format!("c{}", i))));

        let (state, _) = transition(
            &state,
            BrowseEvent::Loaded {
                request: 1,
                candidates: batch,
            },
        );
        assert_eq!(state.phase, BrowsePhase::Ready);
        assert_eq!(state.queue.len(), 10);
        assert_eq!(state.current().unwrap().id, "c0");
        let ids: HashSet<_> = state.queue.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_stale_load_is_dropped() {
        let state = BrowseState::new("me");
        let (state, _) = transition(&state, BrowseEvent::Refresh);
        let (state, _) = transition(&state, BrowseEvent::Refresh);

        let (after, _) = transition(
            &state,
            BrowseEvent::Loaded {
                request: 1,
                candidates: vec![candidate("old")],
            },
        );
        assert_eq!(after, state);

        let (after, _) = transition(
            &state,
            BrowseEvent::Loaded {
                request: 2,
                candidates: vec![candidate("new")],
            },
        );
        assert_eq!(after.current().unwrap().id, "new");
    }

    #[test]
    fn test_empty_fetch_is_exhausted() {
        let (state, _) = transition(&BrowseState::new("me"), BrowseEvent::Refresh);
        let (state, _) = transition(
            &state,
            BrowseEvent::Loaded {
                request: 1,
                candidates: Vec::new(),
            },
        );
        assert_eq!(state.phase, BrowsePhase::Exhausted);
        assert!(!state.accepts_input());

        let (_, effects) = transition(&state, BrowseEvent::Decide(Decision::Like));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_second_decision_ignored_while_in_flight() {
        let (deciding, effects) = transition(&ready("me", &["a", "b"]), BrowseEvent::Decide(Decision::Like));
        assert_eq!(effects.len(), 1);

        let (after, effects) = transition(&deciding, BrowseEvent::Decide(Decision::Pass));
        assert_eq!(after, deciding);
        assert!(effects.is_empty());

        let (after, effects) = transition(&deciding, BrowseEvent::Refresh);
        assert_eq!(after, deciding);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_failed_decision_keeps_queue() {
        let start = ready("me", &["a", "b"]);
        let (deciding, _) = transition(&start, BrowseEvent::Decide(Decision::Pass));
        let (after, _) = transition(
            &deciding,
            BrowseEvent::DecideFailed {
                candidate_id: "a".into(),
                message: "HTTP error! status: 500".into(),
            },
        );
        assert_eq!(after.queue, start.queue);
        assert!(after.accepts_input());
        assert_eq!(after.error.as_deref(), Some("HTTP error! status: 500"));
    }

    #[test]
    fn test_pass_never_reports_match() {
        let (deciding, _) = transition(&ready("me", &["a"]), BrowseEvent::Decide(Decision::Pass));
        let (after, effects) = transition(
            &deciding,
            BrowseEvent::Decided {
                candidate_id: "a".into(),
                is_match: true,
                created_match: None,
            },
        );
        assert_eq!(after.phase, BrowsePhase::Exhausted);
        assert!(after.has_decided("a"));
        assert!(matches!(
            &effects[..],
            [BrowseEffect::Recorded { is_match: false, .. }]
        ));
    }

    #[test]
    fn test_decided_candidates_never_return() {
        let (deciding, _) = transition(&ready("me", &["a", "b"]), BrowseEvent::Decide(Decision::Like));
        let (state, _) = transition(
            &deciding,
            BrowseEvent::Decided {
                candidate_id: "a".into(),
                is_match: false,
                created_match: None,
            },
        );
        let (state, _) = transition(&state, BrowseEvent::Refresh);
        let (state, _) = transition(
            &state,
            BrowseEvent::Loaded {
                request: 1,
                candidates: vec![candidate("a"), candidate("b")],
            },
        );
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.current().unwrap().id, "b");
    }

    // ---------------------------------------------------------
    // MatchWorkflow
    // ---------------------------------------------------------

    fn workflow() -> (Rc<FakeBackend>, MatchWorkflow<Rc<FakeBackend>>) {
        let identity = Rc::new(FakeIdentity::new());
        identity.force_sign_in("u1", "alice@uom.lk");
        assert!(identity.current().is_some());

        let backend = Rc::new(FakeBackend::new());
        backend.add_complete_user("u1", "Alice");
        let api = Rc::new(ProfileApi::new(backend.clone(), API_BASE, identity));
        (backend, MatchWorkflow::new(api, "u1"))
    }

    #[tokio::test]
    async fn test_browse_pass_like_like_scenario() {
        let (backend, wf) = workflow();
        backend.add_complete_user("u2", "Bob");
        backend.add_complete_user("u3", "Chamari");
        backend.add_complete_user("u4", "Dinesh");
        // u3 已经喜欢了 u1
        backend.likes.borrow_mut().push(("u3".into(), "u1".into()));

        let state = wf.refresh().await;
        let ids: Vec<_> = state.queue.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, ["u2", "u3", "u4"]);

        let mut match_events = 0;
        for (decision, expected) in [
            (Decision::Pass, "u2"),
            (Decision::Like, "u3"),
            (Decision::Like, "u4"),
        ] {
            match wf.decide(decision).await {
                DecisionOutcome::Recorded {
                    candidate,
                    is_match,
                    ..
                } => {
                    assert_eq!(candidate.id, expected);
                    if is_match {
                        match_events += 1;
                        assert_eq!(candidate.id, "u3");
                    }
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        assert_eq!(match_events, 1);
        assert_eq!(backend.matches.borrow().len(), 1);
        let state = wf.state();
        assert!(state.queue.is_empty());
        assert_eq!(state.phase, BrowsePhase::Exhausted);
        assert_eq!(wf.like().await, DecisionOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_mutual_like_requires_both_directions() {
        let (backend, wf) = workflow();
        backend.add_complete_user("u2", "Bob");
        wf.refresh().await;

        match wf.like().await {
            DecisionOutcome::Recorded { is_match, .. } => assert!(!is_match),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(backend.matches.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_failed_like_can_be_retried() {
        let (backend, wf) = workflow();
        backend.add_complete_user("u2", "Bob");
        wf.refresh().await;
        backend.fail(LikeRequest::PATH, 500, "Failed to like user");

        assert_eq!(
            wf.like().await,
            DecisionOutcome::Failed("Failed to like user".into())
        );
        assert_eq!(wf.current().unwrap().id, "u2");

        backend.recover(LikeRequest::PATH);
        assert!(matches!(wf.like().await, DecisionOutcome::Recorded { .. }));
        assert_eq!(backend.count(HttpMethod::Post, LikeRequest::PATH), 2);
    }

    #[tokio::test]
    async fn test_concurrent_decisions_send_one_request() {
        let (backend, wf) = workflow();
        backend.add_complete_user("u2", "Bob");
        backend.add_complete_user("u3", "Chamari");
        wf.refresh().await;
        backend.latency.set(3);

        let (first, second) = tokio::join!(wf.pass(), wf.pass());

        assert!(matches!(first, DecisionOutcome::Recorded { .. }));
        assert_eq!(second, DecisionOutcome::Ignored);
        assert_eq!(backend.count(HttpMethod::Post, PassRequest::PATH), 1);
        assert_eq!(wf.current().unwrap().id, "u3");
    }

    #[tokio::test]
    async fn test_load_failure_surfaces_error() {
        let (backend, wf) = workflow();
        backend.set_network_down(true);

        let state = wf.refresh().await;
        assert_eq!(state.phase, BrowsePhase::Idle);
        assert!(state.error.unwrap().starts_with("Network error"));

        backend.set_network_down(false);
        backend.add_complete_user("u2", "Bob");
        assert_eq!(wf.refresh().await.phase, BrowsePhase::Ready);
    }
}
