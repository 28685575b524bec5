//! Chrome trace output, viewable in chrome://tracing or Perfetto.

use crate::path::BuildPath;
use crate::session::{Session, TargetRecord};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

struct Event<'a> {
    name: &'a BuildPath,
    start: Instant,
    end: Instant,
    success: bool,
}

struct Trace<W: Write> {
    start: Instant,
    w: W,
}

impl<W: Write> Trace<W> {
    fn new(mut w: W, start: Instant) -> std::io::Result<Self> {
        write!(w, "[\n")?;
        Ok(Trace { start, w })
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        // The name goes through Debug to get a quoted, escaped string.
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": 0, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {}, \"args\": {{ \"success\": {} }} }}",
            event.name.rel(),
            event.start.duration_since(self.start).as_micros(),
            event.end.duration_since(event.start).as_micros(),
            event.success,
        )
    }

    fn close(mut self) -> std::io::Result<W> {
        write!(self.w, "]\n")?;
        self.w.flush()?;
        Ok(self.w)
    }
}

fn events(records: &[(BuildPath, TargetRecord)]) -> Vec<Event<'_>> {
    let mut events: Vec<Event> = records
        .iter()
        .filter_map(|(target, record)| {
            let (start, end) = record.span?;
            Some(Event {
                name: target,
                start,
                end,
                success: record.success,
            })
        })
        .collect();
    events.sort_by_key(|e| e.start);
    events
}

fn write_trace<W: Write>(w: W, records: &[(BuildPath, TargetRecord)]) -> std::io::Result<W> {
    let events = events(records);
    let start = events.first().map_or_else(Instant::now, |e| e.start);
    let mut trace = Trace::new(w, start)?;
    for (i, event) in events.iter().enumerate() {
        if i > 0 {
            write!(trace.w, ",\n")?;
        }
        trace.write_event(event)?;
    }
    if !events.is_empty() {
        write!(trace.w, "\n")?;
    }
    trace.close()
}

/// Write one complete event per recipe that ran in `session`.
pub fn write_chrome_trace(session: &Session, path: &std::path::Path) -> std::io::Result<()> {
    let w = BufWriter::new(File::create(path)?);
    write_trace(w, &session.records())?;
    Ok(())
}
