/// Output Comparison - Default Correctness Check
///
/// Used when a problem has no custom validator. Compares the judge's reference
/// output with the output the submission produced.
///
/// **Token Rules (default comparator):**
/// - Tokens are separated by any run of ASCII whitespace
/// - Leading/trailing whitespace and line-ending style are ignored
/// - Case sensitivity: YES (exact token match required)
/// - Floating-point tolerance: NO
///
/// The evaluator only consumes the boolean; formatting tolerance is entirely
/// the comparator's concern. Both comparators stream their inputs, since the
/// produced file can be arbitrarily large.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};

const CHUNK_BYTES: usize = 64 * 1024;

#[async_trait]
pub trait OutputComparator: Send + Sync {
    /// `true` when `produced` is an acceptable rendition of `reference`
    async fn matches(&self, reference: &Path, produced: &Path) -> Result<bool>;
}

/// Whitespace-tolerant comparison
pub struct TokenComparator;

/// Byte-for-byte comparison
pub struct ExactComparator;

async fn open(path: &Path) -> Result<File> {
    File::open(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Whitespace-separated tokens pulled from a buffered reader
struct Tokens<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> Tokens<R> {
    /// Read the next token into `token`; `false` once the input is exhausted.
    ///
    /// Stops after `limit + 1` bytes, so an oversized token costs at most that.
    async fn next_into(&mut self, token: &mut Vec<u8>, limit: usize) -> io::Result<bool> {
        token.clear();
        loop {
            let (consumed, done) = {
                let buf = self.reader.fill_buf().await?;
                if buf.is_empty() {
                    return Ok(!token.is_empty());
                }
                let mut consumed = 0;
                let mut done = false;
                for &byte in buf {
                    consumed += 1;
                    if byte.is_ascii_whitespace() {
                        if !token.is_empty() {
                            done = true;
                            break;
                        }
                        continue;
                    }
                    token.push(byte);
                    if token.len() > limit {
                        done = true;
                        break;
                    }
                }
                (consumed, done)
            };
            self.reader.consume(consumed);
            if done {
                return Ok(true);
            }
        }
    }
}

/// Memory use is bounded by the longest reference token, whatever `produced` holds
async fn tokens_match<A, B>(reference: A, produced: B) -> io::Result<bool>
where
    A: AsyncBufRead + Unpin,
    B: AsyncBufRead + Unpin,
{
    let mut reference = Tokens { reader: reference };
    let mut produced = Tokens { reader: produced };
    let mut expected = Vec::new();
    let mut actual = Vec::new();
    loop {
        let more_expected = reference.next_into(&mut expected, usize::MAX).await?;
        let more_actual = produced.next_into(&mut actual, expected.len()).await?;
        match (more_expected, more_actual) {
            (false, false) => return Ok(true),
            (true, true) if expected == actual => continue,
            _ => return Ok(false),
        }
    }
}

#[async_trait]
impl OutputComparator for TokenComparator {
    async fn matches(&self, reference: &Path, produced: &Path) -> Result<bool> {
        let reference = BufReader::with_capacity(CHUNK_BYTES, open(reference).await?);
        let produced = BufReader::with_capacity(CHUNK_BYTES, open(produced).await?);
        tokens_match(reference, produced)
            .await
            .context("Failed to compare outputs")
    }
}

#[async_trait]
impl OutputComparator for ExactComparator {
    async fn matches(&self, reference: &Path, produced: &Path) -> Result<bool> {
        let mut reference = open(reference).await?;
        let mut produced = open(produced).await?;
        let mut expected = vec![0u8; CHUNK_BYTES];
        let mut actual = vec![0u8; CHUNK_BYTES];
        loop {
            let n = reference
                .read(&mut expected)
                .await
                .context("Failed to read reference output")?;
            if n == 0 {
                let extra = produced
                    .read(&mut actual[..1])
                    .await
                    .context("Failed to read produced output")?;
                return Ok(extra == 0);
            }
            match produced.read_exact(&mut actual[..n]).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => return Err(e).context("Failed to read produced output"),
            }
            if expected[..n] != actual[..n] {
                return Ok(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn same(reference: &str, produced: &str) -> bool {
        tokens_match(reference.as_bytes(), produced.as_bytes()).await.unwrap()
    }

    #[tokio::test]
    async fn test_tokens_match() {
        assert!(same("120", "120").await);
        assert!(same("hello", "  hello  \n").await);
        assert!(same("line1\nline2\n", "line1\r\nline2").await);
        assert!(same("1 2 3", "1\n2\t3\n").await);
        assert!(same("", "   \n").await);
    }

    #[tokio::test]
    async fn test_tokens_mismatch() {
        assert!(!same("Hello", "hello").await);
        assert!(!same("1 2", "1 2 3").await);
        assert!(!same("12", "1 2").await);
        assert!(!same("12", "123").await);
        assert!(!same("output", "").await);
    }

    #[tokio::test]
    async fn test_oversized_token_is_cut_short() {
        let data = vec![b'x'; 10_000];
        let mut tokens = Tokens { reader: &data[..] };
        let mut token = Vec::new();
        assert!(tokens.next_into(&mut token, 4).await.unwrap());
        assert_eq!(token.len(), 5);
    }

    #[tokio::test]
    async fn test_tokens_span_buffer_boundaries() {
        let reference = "alpha beta gamma";
        let produced = BufReader::with_capacity(2, "alpha\nbeta   gamma\n".as_bytes());
        assert!(tokens_match(reference.as_bytes(), produced).await.unwrap());
    }

    #[tokio::test]
    async fn test_comparators_on_files() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = tmp.path().join("ans");
        let produced = tmp.path().join("out");
        std::fs::write(&reference, "3\n").unwrap();
        std::fs::write(&produced, "3").unwrap();

        assert!(TokenComparator.matches(&reference, &produced).await.unwrap());
        assert!(!ExactComparator.matches(&reference, &produced).await.unwrap());

        std::fs::write(&produced, "3\n").unwrap();
        assert!(ExactComparator.matches(&reference, &produced).await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_output_is_a_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = tmp.path().join("ans");
        let produced = tmp.path().join("out");
        std::fs::write(&reference, "42\n").unwrap();

        // One long token, then many short ones
        let mut flood = vec![b'4'; 4 * CHUNK_BYTES];
        flood.extend(b" 42".repeat(CHUNK_BYTES));
        std::fs::write(&produced, &flood).unwrap();
        assert!(!TokenComparator.matches(&reference, &produced).await.unwrap());
        assert!(!ExactComparator.matches(&reference, &produced).await.unwrap());

        let mut trailing = b"42\n".to_vec();
        trailing.extend(vec![b'7'; 4 * CHUNK_BYTES]);
        std::fs::write(&produced, &trailing).unwrap();
        assert!(!TokenComparator.matches(&reference, &produced).await.unwrap());
        assert!(!ExactComparator.matches(&reference, &produced).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = tmp.path().join("ans");
        std::fs::write(&reference, "3\n").unwrap();

        let err = TokenComparator
            .matches(&reference, &tmp.path().join("missing"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
