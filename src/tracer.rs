use serde::Serialize;

use crate::{
    common::{Hex, Word, address::Address},
    message::Outcome,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Call,
    Code,
    Static,
    Delegate,
    Create,
    Create2,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum EventData {
    Call {
        r#type: CallType,
        from: Address,
        to: Option<Address>,
        value: Word,
        gas: u64,
        data: Hex,
    },
    /// Emitted after an instruction was charged and applied.
    Step {
        pc: usize,
        op: u8,
        name: String,
        gas_cost: u64,
        gas_used: u64,
        gas_remaining: u64,
    },
    Precompile {
        address: Address,
        gas_used: u64,
        success: bool,
    },
    Exit {
        gas_used: u64,
        outcome: Outcome,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Event {
    pub data: EventData,
    pub depth: usize,
}

#[allow(unused_variables)] // default impl ignores all arguments
pub trait EventTracer: Default {
    /// Lets the interpreter skip building per-step events nobody keeps.
    fn is_enabled(&self) -> bool {
        true
    }
    fn push(&mut self, event: Event) {}
    fn take(&mut self) -> Vec<Event> {
        vec![]
    }
}

#[derive(Debug, Default)]
pub struct NoopTracer;

impl EventTracer for NoopTracer {
    fn is_enabled(&self) -> bool {
        false
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct LoggingTracer(Vec<Event>);

impl LoggingTracer {
    pub fn events(&self) -> &[Event] {
        &self.0
    }
}

impl EventTracer for LoggingTracer {
    fn push(&mut self, event: Event) {
        self.0.push(event);
    }

    fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit() -> Event {
        Event {
            data: EventData::Exit {
                gas_used: 0,
                outcome: Outcome::Reverted,
            },
            depth: 0,
        }
    }

    #[test]
    fn test_noop_tracer_keeps_nothing() {
        let mut tracer = NoopTracer;
        assert!(!tracer.is_enabled());
        tracer.push(exit());
        assert!(tracer.take().is_empty());
    }

    #[test]
    fn test_call_event_keeps_call_type() -> eyre::Result<()> {
        let event = Event {
            data: EventData::Call {
                r#type: CallType::Delegate,
                from: Address::low(0x11),
                to: Some(Address::low(0x22)),
                value: Word::zero(),
                gas: 100,
                data: vec![0xab].into(),
            },
            depth: 1,
        };
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["depth"], 1);
        assert_eq!(json["data"]["event"], "call");
        assert_eq!(json["data"]["type"], "delegate");
        assert_eq!(json["data"]["gas"], 100);
        assert_eq!(json["data"]["data"], "0xab");
        Ok(())
    }

    #[test]
    fn test_logging_tracer_take_drains() {
        let mut tracer = LoggingTracer::default();
        tracer.push(exit());
        assert_eq!(tracer.events().len(), 1);
        assert_eq!(tracer.take(), vec![exit()]);
        assert!(tracer.events().is_empty());
    }
}
