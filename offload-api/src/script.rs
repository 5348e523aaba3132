//! # Worker Scripts
//!
//! A worker script is the fixed entry program every unit of a pool runs.
//! The pool owns the threads; the script only describes what happens on them.
//!
//! ## Lifecycle
//!
//! 1. `init` runs once on the freshly spawned unit thread
//! 2. The unit reports `initialized` and becomes eligible for dispatch
//! 3. `execute` runs once per bound task, strictly one at a time per unit
//!
//! Returning `Err` from `execute` is a task failure: only that task is
//! rejected and the unit stays usable. Panicking is a unit fault: the unit
//! is discarded and, unless the pool is shutting down, replaced.
//!
//! ## Usage Example
//!
//! ```rust
//! use offload_api::script::{UnitContext, WorkerScript};
//! use offload_api::types::{Payload, Transferable};
//! use serde_json::json;
//!
//! struct Square;
//!
//! impl WorkerScript for Square {
//!     fn execute(
//!         &self,
//!         _ctx: &UnitContext,
//!         payload: Payload,
//!         _transfer: Vec<Transferable>,
//!     ) -> anyhow::Result<Payload> {
//!         let n = payload.as_i64().ok_or_else(|| anyhow::anyhow!("expected an integer"))?;
//!         Ok(json!(n * n))
//!     }
//! }
//! ```

use std::sync::Arc;

use uuid::Uuid;

use crate::types::{Payload, Transferable, UnitId};

/// Information a script can read about the unit it is running on.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Pool this unit belongs to
    pub pool_id: Uuid,
    /// Unit identity
    pub unit_id: UnitId,
    /// Entry script name
    pub script: Arc<str>,
}

/// The program run by every unit of a pool.
pub trait WorkerScript: Send + Sync + 'static {
    /// Startup hook, executed on the unit thread before the handshake.
    fn init(&self, _ctx: &UnitContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Execute one task. Transferables arrive by move, never by copy.
    fn execute(
        &self,
        ctx: &UnitContext,
        payload: Payload,
        transfer: Vec<Transferable>,
    ) -> anyhow::Result<Payload>;
}

impl<F> WorkerScript for F
where
    F: Fn(&UnitContext, Payload, Vec<Transferable>) -> anyhow::Result<Payload> + Send + Sync + 'static,
{
    fn execute(
        &self,
        ctx: &UnitContext,
        payload: Payload,
        transfer: Vec<Transferable>,
    ) -> anyhow::Result<Payload> {
        (self)(ctx, payload, transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> UnitContext {
        UnitContext {
            pool_id: Uuid::new_v4(),
            unit_id: UnitId(7),
            script: Arc::from("closure"),
        }
    }

    #[test]
    fn test_closure_is_a_script() {
        let script = |ctx: &UnitContext, payload: Payload, transfer: Vec<Transferable>| -> anyhow::Result<Payload> {
            Ok(json!({"unit": ctx.unit_id.0, "echo": payload, "transferred": transfer.len()}))
        };
        let ctx = ctx();
        assert!(script.init(&ctx).is_ok());

        let out = script.execute(&ctx, json!("hi"), vec![Box::new(1u32)]).unwrap();
        assert_eq!(out, json!({"unit": 7, "echo": "hi", "transferred": 1}));
    }

    #[test]
    fn test_script_as_trait_object() {
        let script: Arc<dyn WorkerScript> =
            Arc::new(|_: &UnitContext, _: Payload, _: Vec<Transferable>| -> anyhow::Result<Payload> {
                anyhow::bail!("unsupported input")
            });
        let err = script.execute(&ctx(), Payload::Null, Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported input");
    }
}
