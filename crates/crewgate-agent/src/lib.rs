//! The agent core: the per-room message processor (agent loop with tool
//! calls), bot dispatch and multi-bot fan-out, asynchronous delegation,
//! identity/teams, the memory facade, and the tool subsystem.

pub mod agent_loop;
pub mod context;
pub mod cross_reference;
pub mod dispatch;
pub mod identity;
pub mod invoker;
pub mod memory;
pub mod multi_bot;
pub mod teams;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentLoopConfig};
pub use dispatch::{BotDispatch, DispatchResult, DispatchTarget};
pub use invoker::BotInvoker;
pub use memory::MemoryFacade;
pub use multi_bot::MultiBotGenerator;
