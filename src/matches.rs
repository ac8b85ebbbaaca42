//! 匹配列表：按标签分组，可按姓名或学院搜索。

use crate::api::ProfileApi;
use crate::error::Result;
use crate::request::HttpClient;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};
use unimatch_shared::Match;
use unimatch_shared::chrono::{DateTime, TimeDelta, Utc};

/// 在线判定窗口
pub const ONLINE_WINDOW: TimeDelta = TimeDelta::minutes(5);
/// 最近消息判定窗口
pub const RECENT_WINDOW: TimeDelta = TimeDelta::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchTab {
    #[default]
    All,
    Online,
    Recent,
}

impl MatchTab {
    pub const ALL: [MatchTab; 3] = [MatchTab::All, MatchTab::Online, MatchTab::Recent];

    pub fn keeps(&self, m: &Match, now: DateTime<Utc>) -> bool {
        match self {
            Self::All => true,
            Self::Online => is_online(m, now),
            Self::Recent => is_recent(m, now),
        }
    }
}

impl fmt::Display for MatchTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "All Matches",
            Self::Online => "Online",
            Self::Recent => "Recent",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TabCounts {
    pub all: usize,
    pub online: usize,
    pub recent: usize,
}

pub fn is_online(m: &Match, now: DateTime<Utc>) -> bool {
    m.other_user
        .as_ref()
        .and_then(|u| u.last_seen)
        .is_some_and(|seen| now - seen <= ONLINE_WINDOW)
}

pub fn is_recent(m: &Match, now: DateTime<Utc>) -> bool {
    m.last_message_time
        .is_some_and(|at| now - at <= RECENT_WINDOW)
}

/// 对方姓名与学院的不区分大小写子串匹配，空查询匹配全部
pub fn matches_query(m: &Match, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    let Some(other) = m.other_user.as_ref() else {
        return false;
    };
    other.full_name().to_lowercase().contains(&query)
        || other
            .faculty
            .as_deref()
            .is_some_and(|f| f.to_lowercase().contains(&query))
}

/// 按最近活动倒序：优先最后消息时间，其次匹配时间
fn last_activity(m: &Match) -> Option<DateTime<Utc>> {
    m.last_message_time.or(m.created_at)
}

pub struct MatchesList<C> {
    api: Rc<ProfileApi<C>>,
    matches: RefCell<Vec<Match>>,
    error: RefCell<Option<String>>,
}

impl<C: HttpClient> MatchesList<C> {
    pub fn new(api: Rc<ProfileApi<C>>) -> Self {
        Self {
            api,
            matches: RefCell::new(Vec::new()),
            error: RefCell::new(None),
        }
    }

    /// 用服务端列表替换本地列表；失败时保留旧列表并记录错误信息
    pub async fn load(&self) -> Result<usize> {
        match self.api.matches().await {
            Ok(mut matches) => {
                matches.sort_by(|a, b| last_activity(b).cmp(&last_activity(a)));
                let count = matches.len();
                *self.matches.borrow_mut() = matches;
                *self.error.borrow_mut() = None;
                debug!(count, "matches loaded");
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "loading matches failed");
                *self.error.borrow_mut() = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn all(&self) -> Vec<Match> {
        self.matches.borrow().clone()
    }

    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn filter(&self, tab: MatchTab, query: &str, now: DateTime<Utc>) -> Vec<Match> {
        self.matches
            .borrow()
            .iter()
            .filter(|m| tab.keeps(m, now) && matches_query(m, query))
            .cloned()
            .collect()
    }

    /// Tab counts ignore the search query.
    pub fn counts(&self, now: DateTime<Utc>) -> TabCounts {
        let matches = self.matches.borrow();
        let count = |tab: MatchTab| matches.iter().filter(|m| tab.keeps(m, now)).count();
        TabCounts {
            all: matches.len(),
            online: count(MatchTab::Online),
            recent: count(MatchTab::Recent),
        }
    }
}
