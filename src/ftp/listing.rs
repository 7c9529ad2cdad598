//! Directory provider: MLSD or LIST, chosen once after FEAT.
//!
//! The lazy [`NodeStream`] decodes entries as lines arrive from the
//! data channel; the eager `list_*` operations collect it and apply the
//! glob filter, hidden-file switch and a stable sort.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol;
use crate::ftp::session::FtpSession;
use crate::ftp::transfer::DataTransfer;
use crate::ftp::types::{
    Encoding, FtpNode, ListOptions, ListingStrategy, NodeKind, SortField, SortOrder,
};

/// Lazily yields listing entries as they are parsed off the wire.
///
/// Drive it with [`next`] until it returns `None`, then call
/// [`finish`] to close the data stream and consume the terminal reply.
///
/// [`next`]: NodeStream::next
/// [`finish`]: NodeStream::finish
pub struct NodeStream {
    reader: BufReader<DataTransfer>,
    strategy: ListingStrategy,
    encoding: Encoding,
    cancel: CancellationToken,
    io_timeout: Duration,
}

impl NodeStream {
    pub(crate) fn new(
        transfer: DataTransfer,
        strategy: ListingStrategy,
        encoding: Encoding,
        cancel: CancellationToken,
        io_timeout: Duration,
    ) -> Self {
        Self {
            reader: BufReader::new(transfer),
            strategy,
            encoding,
            cancel,
            io_timeout,
        }
    }

    /// The next decoded entry, or `None` at end of listing. The `.` and
    /// `..` entries and undecodable lines are skipped.
    pub async fn next(&mut self) -> FtpResult<Option<FtpNode>> {
        let mut buf = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(FtpError::cancelled());
            }
            buf.clear();

            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FtpError::cancelled()),
                r = timeout(self.io_timeout, self.reader.read_until(b'\n', &mut buf)) => match r {
                    Ok(r) => r?,
                    Err(_) => return Err(FtpError::timeout("listing read timed out")),
                },
            };
            if n == 0 {
                return Ok(None);
            }

            let line = protocol::decode_line(&buf, self.encoding)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let node = match self.strategy {
                ListingStrategy::Mlsd => parser::parse_mlsd_line(line),
                ListingStrategy::List => parser::parse_list_line(line),
            };
            match node {
                Some(node) if node.name == "." || node.name == ".." => continue,
                Some(node) => return Ok(Some(node)),
                None => {
                    log::debug!("skipping undecodable listing line: {}", line);
                    continue;
                }
            }
        }
    }

    /// Close the data stream and consume the terminal control reply.
    pub async fn finish(self) {
        self.reader.into_inner().finish().await;
    }
}

impl FtpSession {
    /// Open a lazy listing of `path` (or the working directory).
    pub async fn node_stream(&self, path: Option<&str>) -> FtpResult<NodeStream> {
        let control = self.ensure_authenticated()?;
        let strategy = self.listing_strategy();
        let verb = match strategy {
            ListingStrategy::Mlsd => "MLSD",
            ListingStrategy::List => "LIST",
        };
        let transfer = self.open_transfer(verb, path).await?;
        Ok(NodeStream::new(
            transfer,
            strategy,
            control.encoding(),
            self.cancel_token().child_token(),
            Duration::from_secs(self.config().timeout_secs),
        ))
    }

    pub(crate) async fn collect_nodes(&self, path: Option<&str>) -> FtpResult<Vec<FtpNode>> {
        let mut stream = self.node_stream(path).await?;
        let mut nodes = Vec::new();
        while let Some(node) = stream.next().await? {
            nodes.push(node);
        }
        stream.finish().await;
        Ok(nodes)
    }

    /// Full listing with filter and sort options applied.
    pub async fn list_all(
        &self,
        path: Option<&str>,
        options: ListOptions,
    ) -> FtpResult<Vec<FtpNode>> {
        let mut nodes = self.collect_nodes(path).await?;
        apply_list_options(&mut nodes, &options)?;
        Ok(nodes)
    }

    /// Listing restricted to plain files.
    pub async fn list_files(
        &self,
        path: Option<&str>,
        options: ListOptions,
    ) -> FtpResult<Vec<FtpNode>> {
        let mut nodes = self.list_all(path, options).await?;
        nodes.retain(|n| n.kind == NodeKind::File);
        Ok(nodes)
    }

    /// Listing restricted to directories.
    pub async fn list_directories(
        &self,
        path: Option<&str>,
        options: ListOptions,
    ) -> FtpResult<Vec<FtpNode>> {
        let mut nodes = self.list_all(path, options).await?;
        nodes.retain(|n| n.kind == NodeKind::Directory);
        Ok(nodes)
    }

    /// Bare entry names via NLST.
    pub async fn name_list(&self, path: Option<&str>) -> FtpResult<Vec<String>> {
        let control = self.ensure_authenticated()?;
        let encoding = control.encoding();
        let transfer = self.open_transfer("NLST", path).await?;
        let io_timeout = Duration::from_secs(self.config().timeout_secs);

        let mut reader = BufReader::new(transfer);
        let mut names = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = timeout(io_timeout, reader.read_until(b'\n', &mut buf))
                .await
                .map_err(|_| FtpError::timeout("NLST read timed out"))??;
            if n == 0 {
                break;
            }
            let line = protocol::decode_line(&buf, encoding)?;
            let name = line.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
        reader.into_inner().finish().await;
        Ok(names)
    }
}

/// Glob filter, hidden-file switch, then a stable sort.
fn apply_list_options(nodes: &mut Vec<FtpNode>, options: &ListOptions) -> FtpResult<()> {
    if let Some(filter) = &options.filter {
        let pattern = glob::Pattern::new(filter)
            .map_err(|e| FtpError::invalid_argument(format!("bad filter {:?}: {}", filter, e)))?;
        nodes.retain(|n| pattern.matches(&n.name));
    }
    if !options.show_hidden {
        nodes.retain(|n| !n.name.starts_with('.'));
    }

    if let Some(field) = options.sort_by {
        let descending = matches!(options.sort_order, Some(SortOrder::Descending));
        nodes.sort_by(|a, b| {
            let ord = match field {
                SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                SortField::Modified => a.modified.cmp(&b.modified),
            };
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn node(name: &str, kind: NodeKind, ts: i64) -> FtpNode {
        FtpNode {
            name: name.to_string(),
            kind,
            size: 0,
            modified: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    #[test]
    fn sort_by_name_is_case_insensitive() {
        let mut nodes = vec![
            node("beta", NodeKind::File, 0),
            node("Alpha", NodeKind::File, 0),
        ];
        apply_list_options(
            &mut nodes,
            &ListOptions {
                sort_by: Some(SortField::Name),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(nodes[0].name, "Alpha");
    }

    #[test]
    fn sort_by_modified_descending() {
        let mut nodes = vec![
            node("old", NodeKind::File, 100),
            node("new", NodeKind::File, 200),
        ];
        apply_list_options(
            &mut nodes,
            &ListOptions {
                sort_by: Some(SortField::Modified),
                sort_order: Some(SortOrder::Descending),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(nodes[0].name, "new");
    }

    #[test]
    fn glob_filter_and_hidden_switch() {
        let mut nodes = vec![
            node("a.txt", NodeKind::File, 0),
            node(".hidden.txt", NodeKind::File, 0),
            node("b.bin", NodeKind::File, 0),
        ];
        apply_list_options(
            &mut nodes,
            &ListOptions {
                filter: Some("*.txt".to_string()),
                show_hidden: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "a.txt");
    }

    #[test]
    fn bad_glob_is_invalid_argument() {
        let mut nodes = Vec::new();
        let err = apply_list_options(
            &mut nodes,
            &ListOptions {
                filter: Some("[".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::InvalidArgument);
    }
}
