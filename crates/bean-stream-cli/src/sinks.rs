//! Sequential reading sinks

use std::io::Write;

use bean_stream::{Coalescer, Payload, Reading, Row};

use crate::error::Result;

/// Consumes readings one at a time, in stream order
pub trait ReadingSink {
    fn write(&mut self, reading: &Reading) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// JSON Lines
// ----------------------------------------------------------------------------

/// One JSON stream object per line
pub struct JsonLines<W: Write> {
    out: W,
}

impl<W: Write> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReadingSink for JsonLines<W> {
    fn write(&mut self, reading: &Reading) -> Result<()> {
        serde_json::to_writer(&mut self.out, reading)?;
        self.out.write_all(b"\r\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}

// ----------------------------------------------------------------------------
// Serial Text
// ----------------------------------------------------------------------------

/// Raw serial payloads, concatenated; other readings are screened out
pub struct SerialText<W: Write> {
    out: W,
}

impl<W: Write> SerialText<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReadingSink for SerialText<W> {
    fn write(&mut self, reading: &Reading) -> Result<()> {
        if let Payload::Serial { data } = &reading.payload {
            self.out.write_all(data)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}

// ----------------------------------------------------------------------------
// Rows
// ----------------------------------------------------------------------------

/// Temperature / acceleration pairs written as one JSON row per line
pub struct RowLines<W: Write> {
    coalescer: Coalescer,
    out: W,
}

impl<W: Write> RowLines<W> {
    pub fn new(coalescer: Coalescer, out: W) -> Self {
        Self { coalescer, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReadingSink for RowLines<W> {
    fn write(&mut self, reading: &Reading) -> Result<()> {
        let Some(merged) = self.coalescer.offer(reading.clone()) else {
            return Ok(());
        };
        if let Some(row) = Row::from_reading(&merged) {
            serde_json::to_writer(&mut self.out, &row)?;
            self.out.write_all(b"\r\n")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}
