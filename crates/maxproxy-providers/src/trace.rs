//! Per-request stream trace files for troubleshooting.
//!
//! When enabled, raw upstream SSE chunks and the converted chunks returned
//! to the client are appended to a request-scoped log file, capped at a
//! configurable byte budget. Tracing is best-effort: write failures are
//! swallowed and never affect the request.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

struct TracerInner {
    file: File,
    written: u64,
    truncated: bool,
}

/// Captures streaming data into a request-scoped log file.
pub struct StreamTracer {
    path: PathBuf,
    max_bytes: Option<u64>,
    inner: Mutex<Option<TracerInner>>,
}

impl StreamTracer {
    /// Create a tracer when tracing is enabled; `None` otherwise.
    pub fn maybe_create(
        enabled: bool,
        request_id: &str,
        route: &str,
        base_dir: &str,
        max_bytes: u64,
    ) -> Option<StreamTracer> {
        if !enabled {
            return None;
        }

        let safe_route = route.replace(' ', "-");
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let dir = PathBuf::from(base_dir);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(error = %e, "failed to create stream trace dir");
            return None;
        }

        let path = dir.join(format!("{timestamp}_{safe_route}_{request_id}.log"));
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to create stream trace file");
                return None;
            }
        };

        let tracer = StreamTracer {
            path,
            max_bytes: (max_bytes > 0).then_some(max_bytes),
            inner: Mutex::new(Some(TracerInner {
                file,
                written: 0,
                truncated: false,
            })),
        };
        tracer.log_note("stream tracer initialized");
        Some(tracer)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Record a raw upstream SSE chunk.
    pub fn log_source_chunk(&self, chunk: &str) {
        self.write("SOURCE", chunk);
    }

    /// Record a chunk returned to the client.
    pub fn log_converted_chunk(&self, chunk: &str) {
        self.write("CONVERTED", chunk);
    }

    pub fn log_note(&self, note: &str) {
        self.write("NOTE", note);
    }

    pub fn log_error(&self, message: &str) {
        self.write("ERROR", message);
    }

    pub fn close(&self) {
        self.log_note("stream tracer closed");
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner = None;
    }

    fn write(&self, label: &str, payload: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(inner) = guard.as_mut() else {
            return;
        };

        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        let entry = format!("[{timestamp}] [{label}] len={}\n{payload}\n", payload.len());
        let encoded = entry.as_bytes();

        if let Some(max) = self.max_bytes {
            let remaining = max.saturating_sub(inner.written);

            if remaining == 0 {
                if !inner.truncated {
                    let _ = inner.file.write_all(b"[stream trace truncated]\n");
                    let _ = inner.file.flush();
                    inner.truncated = true;
                }
                return;
            }

            if encoded.len() as u64 > remaining {
                let cut = floor_char_boundary(&entry, remaining as usize);
                let _ = inner.file.write_all(entry[..cut].as_bytes());
                let _ = inner.file.write_all(b"\n[stream trace truncated]\n");
                let _ = inner.file.flush();
                inner.written = max;
                inner.truncated = true;
                return;
            }
        }

        let _ = inner.file.write_all(encoded);
        let _ = inner.file.flush();
        inner.written += encoded.len() as u64;
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_yields_none() {
        assert!(StreamTracer::maybe_create(false, "abc", "route", "/tmp", 1024).is_none());
    }

    #[test]
    fn writes_labelled_entries() {
        let dir = tempfile::tempdir().unwrap();
        let tracer = StreamTracer::maybe_create(
            true,
            "req1",
            "openai chat",
            dir.path().to_str().unwrap(),
            0,
        )
        .unwrap();
        tracer.log_source_chunk("event: ping\n\n");
        tracer.log_converted_chunk("data: {}\n\n");
        tracer.close();

        let contents = fs::read_to_string(tracer.path()).unwrap();
        assert!(contents.contains("[SOURCE]"));
        assert!(contents.contains("[CONVERTED]"));
        // route spaces are sanitized into the filename
        assert!(tracer.path().to_str().unwrap().contains("openai-chat_req1"));
    }

    #[test]
    fn truncates_at_byte_budget() {
        let dir = tempfile::tempdir().unwrap();
        let tracer =
            StreamTracer::maybe_create(true, "req2", "r", dir.path().to_str().unwrap(), 200)
                .unwrap();
        for _ in 0..50 {
            tracer.log_source_chunk("0123456789012345678901234567890123456789");
        }
        tracer.close();

        let contents = fs::read_to_string(tracer.path()).unwrap();
        assert!(contents.contains("[stream trace truncated]"));
        // budget plus the truncation notices, not 50 full entries
        assert!(contents.len() < 400);
    }

    #[test]
    fn writes_after_close_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tracer =
            StreamTracer::maybe_create(true, "req3", "r", dir.path().to_str().unwrap(), 0)
                .unwrap();
        tracer.close();
        tracer.log_note("after close");
        let contents = fs::read_to_string(tracer.path()).unwrap();
        assert!(!contents.contains("after close"));
    }
}
