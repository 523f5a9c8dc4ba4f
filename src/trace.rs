//! Chrome-tracing output.
//!
//! The engine reports begin/end events through the [`TraceSink`] trait;
//! [`ChromeTraceWriter`] renders them in the Chrome `chrome://tracing`
//! JSON array format, one event object per line. The document opens
//! with `[`, every event line ends with a trailing comma, and the file
//! is closed by an empty `{}` object followed by `]` so the trailing
//! commas stay legal.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

/// Event category, one row group per kind of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCategory {
    /// Op execution windows on a launcher.
    #[serde(rename = "operation")]
    Operation,
    /// Busy windows on a memory port.
    #[serde(rename = "memory")]
    Memory,
    /// Reserved for queue-level annotations; part of the wire format
    /// but not emitted by the engine.
    #[serde(rename = "equeue")]
    Equeue,
}

/// Event phase: interval begin or end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    B,
    E,
}

/// Always-empty `args` object required by the trace format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Args {}

/// One trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    pub cat: EventCategory,
    pub ph: Phase,
    /// Virtual time in cycles.
    pub ts: u64,
    pub pid: u64,
    pub tid: u64,
    #[serde(default)]
    pub args: Args,
}

impl TraceEvent {
    pub fn new(
        name: impl Into<String>,
        cat: EventCategory,
        ph: Phase,
        ts: u64,
        pid: u64,
        tid: u64,
    ) -> Self {
        Self {
            name: name.into(),
            cat,
            ph,
            ts,
            pid,
            tid,
            args: Args {},
        }
    }
}

/// Where the engine sends its events.
pub trait TraceSink {
    fn event(&mut self, ev: &TraceEvent) -> io::Result<()>;
}

impl<T: TraceSink + ?Sized> TraceSink for &mut T {
    fn event(&mut self, ev: &TraceEvent) -> io::Result<()> {
        (**self).event(ev)
    }
}

/// Streams events as a Chrome-tracing JSON array.
pub struct ChromeTraceWriter<W: Write> {
    out: W,
}

impl<W: Write> ChromeTraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Open the JSON array. Call once before the run.
    pub fn start(&mut self) -> io::Result<()> {
        writeln!(self.out, "[")
    }

    /// Close the JSON array. The `{{}}` placeholder keeps the trailing
    /// comma of the last event legal. Call once after the run, also on
    /// an aborted run so the prefix stays loadable.
    pub fn finish(&mut self) -> io::Result<()> {
        writeln!(self.out, "{{}}]")?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceSink for ChromeTraceWriter<W> {
    fn event(&mut self, ev: &TraceEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, ev)?;
        writeln!(self.out, ",")
    }
}

/// Collects events in memory; used by tests and library callers that
/// post-process instead of serializing.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub events: Vec<TraceEvent>,
}

impl TraceSink for CollectSink {
    fn event(&mut self, ev: &TraceEvent) -> io::Result<()> {
        self.events.push(ev.clone());
        Ok(())
    }
}

/// Check that every `B` event has a later matching `E` with the same
/// name, category, pid and tid. Returns the first violation.
pub fn check_balanced(events: &[TraceEvent]) -> Result<(), String> {
    let mut open: Vec<&TraceEvent> = Vec::new();
    for ev in events {
        match ev.ph {
            Phase::B => open.push(ev),
            Phase::E => {
                let pos = open.iter().position(|b| {
                    b.name == ev.name && b.cat == ev.cat && b.pid == ev.pid && b.tid == ev.tid
                });
                match pos {
                    Some(i) => {
                        let b = open.remove(i);
                        if ev.ts < b.ts {
                            return Err(format!(
                                "E before B for `{}` (B @ {}, E @ {})",
                                ev.name, b.ts, ev.ts
                            ));
                        }
                    }
                    None => return Err(format!("unmatched E event `{}` @ {}", ev.name, ev.ts)),
                }
            }
        }
    }
    if let Some(b) = open.first() {
        return Err(format!("unmatched B event `{}` @ {}", b.name, b.ts));
    }
    Ok(())
}
