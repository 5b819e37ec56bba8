// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::tail::{GlobEvent, TailEvent};

/// Writes tailed chunks the way `tail -f` does, with a `==> path <==` header
/// whenever the output switches to a different file.
pub struct ChunkPrinter<W> {
    out: W,
    headers: bool,
    current: Option<PathBuf>,
}

impl<W: AsyncWrite + Unpin> ChunkPrinter<W> {
    pub fn new(out: W, headers: bool) -> Self {
        Self {
            out,
            headers,
            current: None,
        }
    }

    pub async fn write_event(&mut self, event: &TailEvent) -> std::io::Result<()> {
        let TailEvent::Data { path, bytes } = event else {
            return Ok(());
        };

        if self.headers && self.current.as_ref() != Some(path) {
            let sep = if self.current.is_some() { "\n" } else { "" };
            let header = format!("{}==> {} <==\n", sep, path.display());
            self.out.write_all(header.as_bytes()).await?;
            self.current = Some(path.clone());
        }
        self.out.write_all(bytes).await?;
        self.out.flush().await
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn format_glob_event(event: &GlobEvent) -> String {
    match event {
        GlobEvent::Found(path) => format!("Found: {}", path.display()),
        GlobEvent::Deleted(path) => format!("Removed: {}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(path: &str, bytes: &[u8]) -> TailEvent {
        TailEvent::Data {
            path: PathBuf::from(path),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_headers_on_switch() {
        let mut printer = ChunkPrinter::new(Vec::new(), true);
        printer.write_event(&data("/a.log", b"one\n")).await.unwrap();
        printer.write_event(&data("/a.log", b"two\n")).await.unwrap();
        printer
            .write_event(&TailEvent::Eof {
                path: PathBuf::from("/a.log"),
            })
            .await
            .unwrap();
        printer.write_event(&data("/b.log", b"three\n")).await.unwrap();

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(
            out,
            "==> /a.log <==\none\ntwo\n\n==> /b.log <==\nthree\n"
        );
    }

    #[tokio::test]
    async fn test_raw_without_headers() {
        let mut printer = ChunkPrinter::new(Vec::new(), false);
        printer.write_event(&data("/a.log", b"one")).await.unwrap();
        printer.write_event(&data("/b.log", b"two")).await.unwrap();
        assert_eq!(printer.into_inner(), b"onetwo");
    }

    #[test]
    fn test_format_glob_event() {
        assert_eq!(
            format_glob_event(&GlobEvent::Found(PathBuf::from("/x.log"))),
            "Found: /x.log"
        );
        assert_eq!(
            format_glob_event(&GlobEvent::Deleted(PathBuf::from("/x.log"))),
            "Removed: /x.log"
        );
    }
}
