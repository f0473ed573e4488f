//! Concurrent draining of a child's output pipes.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;

/// Longest line forwarded to observers before it is split.
const MAX_LINE_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// One line of output, tagged with the stream it came from.
///
/// Carriage returns count as line breaks so progress meters that redraw a
/// single terminal line still arrive as separate events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Stdout(s) | Self::Stderr(s) => s,
        }
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self, Self::Stderr(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn line(self, text: String) -> OutputLine {
        match self {
            Self::Stdout => OutputLine::Stdout(text),
            Self::Stderr => OutputLine::Stderr(text),
        }
    }
}

/// Text captured from one stream, bounded by the engine's cap.
///
/// Shared with the drainer task so whatever arrived before a drainer is
/// abandoned is still reported.
pub(crate) type SharedCapture = Arc<Mutex<Captured>>;

#[derive(Debug, Default)]
pub(crate) struct Captured {
    bytes: Vec<u8>,
    pub truncated: bool,
}

impl Captured {
    pub fn push(&mut self, chunk: &[u8], cap: usize) {
        if self.truncated {
            return;
        }
        let room = cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    pub fn into_text(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.bytes).into_owned(), self.truncated)
    }
}

#[derive(Default)]
struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    fn feed(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    emit(&self.pending);
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
                if self.pending.len() >= MAX_LINE_LEN {
                    emit(&self.pending);
                    self.pending.clear();
                }
            }
        }
    }

    fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.pending.is_empty() {
            emit(&self.pending);
            self.pending.clear();
        }
    }
}

/// Read `reader` to EOF into `sink`, keeping at most `cap` bytes and
/// forwarding every line to `observer`.
///
/// Reading continues after the cap is hit so the child never blocks on a
/// full pipe.
pub(crate) async fn drain<R>(
    reader: Option<R>,
    stream: Stream,
    cap: usize,
    sink: SharedCapture,
    observer: Option<UnboundedSender<OutputLine>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut lines = LineAssembler::default();
    let mut buf = vec![0u8; READ_CHUNK];

    let forward = |line: &[u8]| {
        if let Some(tx) = &observer {
            // A dropped receiver only means nobody is watching any more.
            let _ = tx.send(stream.line(String::from_utf8_lossy(line).into_owned()));
        }
    };

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.lock().push(&buf[..n], cap);
        lines.feed(&buf[..n], forward);
    }
    lines.finish(forward);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn captures_and_forwards_lines() {
        let input: &[u8] = b"Available streams: best\r\n[download] segment 1 downloaded\nno newline";
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sink = SharedCapture::default();
        drain(Some(input), Stream::Stdout, 1024, sink.clone(), Some(tx)).await.unwrap();
        let (text, truncated) = std::mem::take(&mut *sink.lock()).into_text();
        assert!(!truncated);
        assert!(text.ends_with("no newline"));

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                OutputLine::Stdout("Available streams: best".into()),
                OutputLine::Stdout("[download] segment 1 downloaded".into()),
                OutputLine::Stdout("no newline".into()),
            ]
        );
    }

    #[tokio::test]
    async fn caps_captured_text() {
        let input = vec![b'x'; 10_000];
        let sink = SharedCapture::default();
        drain(Some(input.as_slice()), Stream::Stderr, 100, sink.clone(), None)
            .await
            .unwrap();
        let (text, truncated) = std::mem::take(&mut *sink.lock()).into_text();
        assert!(truncated);
        assert_eq!(text.len(), 100);
    }

    #[tokio::test]
    async fn missing_pipe_is_empty() {
        let sink = SharedCapture::default();
        drain::<&[u8]>(None, Stream::Stdout, 10, sink.clone(), None).await.unwrap();
        let (text, truncated) = std::mem::take(&mut *sink.lock()).into_text();
        assert!(text.is_empty());
        assert!(!truncated);
    }
}
