use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Splits a byte stream into LF-delimited lines.
///
/// Zero-length lines between consecutive LFs are preserved. The returned
/// slice borrows an internal buffer that is overwritten on the next call,
/// so callers copy if they retain.
pub(crate) struct LineSplitter<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineSplitter<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Next line without its trailing LF, or `None` at end of stream.
    /// A final unterminated line is yielded before the stream ends.
    pub(crate) async fn next_line(&mut self) -> std::io::Result<Option<&[u8]>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        Ok(Some(&self.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> Vec<Vec<u8>> {
        let mut splitter = LineSplitter::new(input);
        let mut lines = Vec::new();
        while let Some(line) = splitter.next_line().await.unwrap() {
            lines.push(line.to_vec());
        }
        lines
    }

    #[tokio::test]
    async fn splits_on_lf() {
        let lines = collect(b"alpha\nbeta\ngamma\n").await;
        assert_eq!(lines, vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);
    }

    #[tokio::test]
    async fn preserves_empty_lines() {
        let lines = collect(b"alpha\n\nbeta\n").await;
        assert_eq!(lines, vec![b"alpha".to_vec(), Vec::new(), b"beta".to_vec()]);
    }

    #[tokio::test]
    async fn flushes_final_unterminated_line() {
        let lines = collect(b"alpha\nbeta").await;
        assert_eq!(lines, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[tokio::test]
    async fn trailing_double_lf_yields_one_empty_line() {
        let lines = collect(b"alpha\n\n").await;
        assert_eq!(lines, vec![b"alpha".to_vec(), Vec::new()]);
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        assert!(collect(b"").await.is_empty());
    }
}
