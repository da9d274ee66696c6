//! Incremental Server-Sent-Events parser.
//!
//! Feed it raw body chunks in arrival order; it yields complete events on
//! each blank-line terminator. Line endings may be LF, CRLF, or bare CR,
//! and a trailing `\r` at a chunk boundary is deferred so a CRLF split
//! across chunks still counts as one terminator. One leading space after
//! the `:` separator is dropped. `finish()` flushes a residual event at
//! EOF.
//!
//! Limits (both fatal for the stream): 1 MiB for any single line,
//! 512 KiB for one event's accumulated `data:`.

use crate::error::GatewayError;

pub const MAX_LINE_BYTES: usize = 1024 * 1024;
pub const MAX_DATA_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; "message" when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last seen `id:`, sticky across events per the SSE model.
    pub id: Option<String>,
}

#[derive(Default)]
pub struct SseParser {
    line: Vec<u8>,
    prev_cr: bool,
    event_type: String,
    data: String,
    has_data: bool,
    id: Option<String>,
    ready: Vec<SseEvent>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk; returns any events completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, GatewayError> {
        for &b in chunk {
            if self.prev_cr {
                self.prev_cr = false;
                if b == b'\n' {
                    continue; // second half of a CRLF
                }
            }
            match b {
                b'\n' => self.end_line()?,
                b'\r' => {
                    self.end_line()?;
                    self.prev_cr = true;
                }
                _ => {
                    if self.line.len() >= MAX_LINE_BYTES {
                        return Err(GatewayError::EventOverflow(format!(
                            "SSE line exceeds {MAX_LINE_BYTES} bytes"
                        )));
                    }
                    self.line.push(b);
                }
            }
        }
        Ok(std::mem::take(&mut self.ready))
    }

    /// EOF: flush a final unterminated line and any residual event.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>, GatewayError> {
        self.prev_cr = false;
        if !self.line.is_empty() {
            self.end_line()?;
        }
        if self.has_data {
            self.dispatch();
        }
        Ok(std::mem::take(&mut self.ready))
    }

    fn end_line(&mut self) -> Result<(), GatewayError> {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        if line.is_empty() {
            // Blank line: dispatch if any data accumulated, else just reset
            // the event type.
            if self.has_data {
                self.dispatch();
            } else {
                self.event_type.clear();
            }
            return Ok(());
        }
        if line.starts_with(':') {
            return Ok(()); // comment / keep-alive
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line.as_str(), ""),
        };

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => {
                let extra = value.len() + usize::from(self.has_data);
                if self.data.len() + extra > MAX_DATA_BYTES {
                    return Err(GatewayError::EventOverflow(format!(
                        "SSE event data exceeds {MAX_DATA_BYTES} bytes"
                    )));
                }
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            // retry: the relay does not steer our reconnect cadence
            _ => {}
        }
        Ok(())
    }

    fn dispatch(&mut self) {
        let event = if self.event_type.is_empty() {
            "message".to_string()
        } else {
            std::mem::take(&mut self.event_type)
        };
        self.ready.push(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
            id: self.id.clone(),
        });
        self.event_type.clear();
        self.has_data = false;
    }
}
