//! Rebalance planning.
//!
//! # Data Flow
//! ```text
//! registry (locked)
//!     → pick busiest backend with a movable connection
//!     → pick idlest healthy backend
//!     → stop if the ratio is within target (unless draining an unhealthy source)
//!     → begin_redirect (scores move immediately)
//!     → repeat up to quota
//! plans (lock released)
//!     → conn.redirect(to) by the router
//! ```
//!
//! # Design Decisions
//! - Planning only touches the registry; proposals are sent after the lock is dropped
//! - Oldest connection first, so a connection that just moved is the last to move again
//! - A connection that failed recently is skipped until the cool-down expires

use std::time::Instant;

use crate::config::BalanceConfig;
use crate::router::conn::{ConnHandle, RedirectableConn};
use crate::router::registry::BackendRegistry;

/// A migration decided under the registry lock, to be proposed outside it.
pub struct RedirectPlan {
    pub conn: ConnHandle,
    pub from: String,
    pub to: String,
}

impl std::fmt::Debug for RedirectPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectPlan")
            .field("connection_id", &self.conn.connection_id())
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Decide up to `quota` migrations and apply their bookkeeping.
pub fn plan_rebalance(
    registry: &mut BackendRegistry,
    quota: usize,
    config: &BalanceConfig,
    now: Instant,
) -> Vec<RedirectPlan> {
    let mut plans = Vec::new();
    if registry.len() < 2 {
        return plans;
    }
    let balancing = registry.total_conns() >= config.min_connections;
    let fail_interval = config.redirect_fail_min_interval();

    for _ in 0..quota {
        // Busiest backend that still has something movable.
        let source = registry.backends().iter().rev().find_map(|b| {
            b.conns()
                .find(|c| c.is_eligible(now, fail_interval) && c.conn.is_redirectable())
                .map(|c| (b, c.id()))
        });
        let Some((source, conn_id)) = source else {
            break;
        };
        let Some(target) = registry
            .backends()
            .iter()
            .find(|b| b.status().is_healthy() && b.addr() != source.addr())
        else {
            break;
        };

        // Draining an unhealthy source ignores both the ratio and the connection floor.
        if source.status().is_healthy() {
            if !balancing {
                break;
            }
            let ratio = source.score() as f64 / (target.score() as f64 + 1.0);
            if ratio < config.max_score_ratio {
                break;
            }
        }

        let from = source.addr().to_string();
        let to = target.addr().to_string();
        match registry.begin_redirect(&from, conn_id, &to, now) {
            Some(conn) => plans.push(RedirectPlan { conn, from, to }),
            None => break,
        }
    }
    plans
}
