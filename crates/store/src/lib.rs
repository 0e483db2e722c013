//! Typed persistence gateway over PostgreSQL. All core state — sessions,
//! messages, cron jobs and history, model usage, agent state — goes
//! through [`Store`]; no other crate issues SQL.

mod hash;
mod store;

pub use hash::content_hash;
pub use store::{AgentSessionStat, AppendMeta, Store};
