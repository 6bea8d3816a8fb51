//! Plain-text rendering of progress events.
//!
//! Output mirrors the familiar BuildKit plain mode:
//!
//! ```text
//! [app linux-builder] #1 [internal] booting buildkit
//! [app linux-builder] #1 DONE 2.3s
//! ```

use super::{ProgressReceiver, StatusEvent, Vertex};
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::SystemTime;

/// Renders progress events as lines on a writer.
pub struct Printer<W: Write> {
    out: W,
    numbers: HashMap<(Option<String>, String), usize>,
    started: HashMap<(Option<String>, String), SystemTime>,
    next: usize,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self { out, numbers: HashMap::new(), started: HashMap::new(), next: 1 }
    }

    /// Drain the receiver until every writer has been dropped.
    pub async fn run(mut self, mut rx: ProgressReceiver) -> io::Result<W> {
        while let Some(event) = rx.recv().await {
            self.render(&event)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }

    /// Render a single event.
    pub fn render(&mut self, event: &StatusEvent) -> io::Result<()> {
        let lead = match &event.prefix {
            Some(prefix) => format!("[{}] ", prefix),
            None => String::new(),
        };

        for vertex in &event.status.vertexes {
            self.render_vertex(&lead, &event.prefix, vertex)?;
        }

        for log in &event.status.logs {
            let key = (event.prefix.clone(), log.vertex.clone());
            let number = self.number(key);
            let text = String::from_utf8_lossy(&log.data);
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                writeln!(self.out, "{}#{} {}", lead, number, line)?;
            }
        }
        Ok(())
    }

    fn render_vertex(
        &mut self,
        lead: &str,
        prefix: &Option<String>,
        vertex: &Vertex,
    ) -> io::Result<()> {
        let key = (prefix.clone(), vertex.digest.clone());
        let first_sighting = !self.numbers.contains_key(&key);
        let number = self.number(key.clone());

        if first_sighting {
            writeln!(self.out, "{}#{} {}", lead, number, vertex.name)?;
        }
        if let Some(started) = vertex.started {
            self.started.entry(key.clone()).or_insert(started);
        }

        if vertex.cached {
            writeln!(self.out, "{}#{} CACHED", lead, number)?;
        } else if let Some(error) = &vertex.error {
            writeln!(self.out, "{}#{} ERROR: {}", lead, number, error)?;
        } else if let Some(completed) = vertex.completed {
            let elapsed = self
                .started
                .get(&key)
                .and_then(|s| completed.duration_since(*s).ok())
                .unwrap_or_default();
            writeln!(self.out, "{}#{} DONE {:.1}s", lead, number, elapsed.as_secs_f64())?;
        }
        Ok(())
    }

    fn number(&mut self, key: (Option<String>, String)) -> usize {
        let next = &mut self.next;
        *self.numbers.entry(key).or_insert_with(|| {
            let n = *next;
            *next += 1;
            n
        })
    }
}
