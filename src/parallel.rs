//! Channel-pipeline processing for large dumps.
//!
//! A reader thread cuts `<page>` elements out of the dump, worker threads
//! extract and process them, and the calling thread writes the results in
//! page order. Every page gets its own walker state; the schema is the only
//! thing shared, read-only, between workers.

use crate::dump::{extract_page, process_page, scan_pages, ProcessedPage, ScanMode, Stats};
use crate::schema::Schema;

use std::collections::BTreeMap;
use std::io::{BufRead, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Bound of the page and result channels
    pub channel_buffer: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self {
            num_workers: cpus.saturating_sub(1).max(1),
            channel_buffer: 10000,
        }
    }
}

/// Producer thread reads XML, worker threads process pages, the caller's
/// thread writes JSONL. Results are reordered by page id so the output is
/// identical to a sequential run.
pub fn process_channel_pipeline<W: Write>(
    reader: impl BufRead + Send + 'static,
    writer: W,
    schema: Arc<Schema>,
    mode: ScanMode,
    config: &ParallelConfig,
    page_limit: Option<usize>,
) -> std::io::Result<Stats> {
    let (page_tx, page_rx): (SyncSender<(usize, String)>, Receiver<(usize, String)>) =
        sync_channel(config.channel_buffer);
    let (result_tx, result_rx): (SyncSender<ProcessedPage>, Receiver<ProcessedPage>) =
        sync_channel(config.channel_buffer);

    let stop = Arc::new(AtomicBool::new(false));
    let start_time = Instant::now();

    let reader_stop = Arc::clone(&stop);
    let reader_handle =
        thread::spawn(move || read_pages_to_channel(reader, page_tx, &reader_stop, page_limit));

    let page_rx = Arc::new(Mutex::new(page_rx));
    let worker_handles: Vec<JoinHandle<()>> = (0..config.num_workers.max(1))
        .map(|_| {
            let rx = Arc::clone(&page_rx);
            let tx = result_tx.clone();
            let schema = Arc::clone(&schema);
            let stop = Arc::clone(&stop);
            thread::spawn(move || process_pages_worker(rx, tx, &schema, mode, &stop))
        })
        .collect();

    // Channel closes once every worker has dropped its sender
    drop(result_tx);

    let written = write_results_sorted(result_rx, writer);
    if written.is_err() {
        stop.store(true, Ordering::SeqCst);
    }

    let read = reader_handle.join();
    for handle in worker_handles {
        if handle.join().is_err() {
            log::error!("worker thread panicked");
        }
    }

    let mut stats = written?;
    match read {
        Ok(Ok(pages)) => log::debug!("reader sent {} pages", pages),
        Ok(Err(e)) => return Err(e),
        Err(_) => log::error!("reader thread panicked"),
    }

    stats.elapsed = start_time.elapsed();
    Ok(stats)
}

fn read_pages_to_channel(
    reader: impl BufRead,
    tx: SyncSender<(usize, String)>,
    stop: &AtomicBool,
    page_limit: Option<usize>,
) -> std::io::Result<usize> {
    let mut page_id: usize = 0;

    scan_pages(reader, |page_xml| {
        if stop.load(Ordering::Relaxed) || page_limit.is_some_and(|limit| page_id >= limit) {
            return false;
        }
        if tx.send((page_id, page_xml)).is_err() {
            return false;
        }
        page_id += 1;
        page_limit.map_or(true, |limit| page_id < limit)
    })?;

    Ok(page_id)
}

fn process_pages_worker(
    rx: Arc<Mutex<Receiver<(usize, String)>>>,
    tx: SyncSender<ProcessedPage>,
    schema: &Schema,
    mode: ScanMode,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let item = {
            let lock = rx.lock().ok();
            lock.and_then(|guard| guard.recv().ok())
        };

        let Some((page_id, xml)) = item else {
            break;
        };

        let result = match extract_page(&xml, page_id) {
            Some(raw) => process_page(raw, schema, mode),
            None => ProcessedPage::unreadable(page_id),
        };
        if tx.send(result).is_err() {
            break;
        }
    }
}

/// Write results in page order using a streaming reorder buffer.
///
/// Out-of-order results wait in a `BTreeMap` until their predecessors have
/// been written.
fn write_results_sorted<W: Write>(rx: Receiver<ProcessedPage>, writer: W) -> std::io::Result<Stats> {
    let mut writer = BufWriter::with_capacity(256 * 1024, writer);
    let mut stats = Stats::default();
    let mut pending: BTreeMap<usize, ProcessedPage> = BTreeMap::new();
    let mut next_expected: usize = 0;

    for result in rx {
        pending.insert(result.page_id, result);

        while let Some(ready) = pending.remove(&next_expected) {
            write_page(&ready, &mut stats, &mut writer)?;
            next_expected += 1;
        }
    }

    // Only reachable if a page id never arrived
    for (_, result) in std::mem::take(&mut pending) {
        write_page(&result, &mut stats, &mut writer)?;
    }

    writer.flush()?;
    Ok(stats)
}

/// Write one processed page as JSONL and update the counters.
pub fn write_page<W: Write>(
    page: &ProcessedPage,
    stats: &mut Stats,
    writer: &mut W,
) -> std::io::Result<()> {
    stats.record_page(page);
    for record in &page.records {
        match serde_json::to_string(record) {
            Ok(json) => {
                writeln!(writer, "{}", json)?;
                stats.records_written += 1;
            }
            Err(e) => log::warn!("{}: could not serialise record: {}", page.title, e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    const SCHEMA: &str = r##"
language: English
entry_headings: [Noun]
allow_prefix_match: true
templates:
  "#": definition
"##;

    fn dump(pages: usize) -> String {
        let mut xml = String::from("<mediawiki>\n");
        for i in 0..pages {
            xml.push_str(&format!(
                "<page><title>word{}</title><ns>0</ns><text>==English==\n===Noun===\n# sense {}</text></page>\n",
                i, i
            ));
        }
        xml.push_str("</mediawiki>\n");
        xml
    }

    fn run(pages: usize, workers: usize, page_limit: Option<usize>) -> (Stats, Vec<String>) {
        let schema = Arc::new(Schema::parse(SCHEMA).unwrap());
        let config = ParallelConfig {
            num_workers: workers,
            channel_buffer: 4,
        };
        let mut out = Vec::new();
        let stats = process_channel_pipeline(
            BufReader::new(Cursor::new(dump(pages))),
            &mut out,
            schema,
            ScanMode::Entries,
            &config,
            page_limit,
        )
        .unwrap();
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        (stats, lines)
    }

    #[test]
    fn output_is_in_page_order() {
        let (stats, lines) = run(50, 4, None);
        assert_eq!(stats.pages_processed, 50);
        assert_eq!(stats.records_written, 50);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.starts_with(&format!(r#"{{"id":"word{}","#, i)), "{}", line);
        }
    }

    #[test]
    fn page_limit_stops_reader() {
        let (stats, lines) = run(50, 2, Some(10));
        assert_eq!(stats.pages_processed, 10);
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn zero_page_limit_processes_nothing() {
        let (stats, lines) = run(5, 2, Some(0));
        assert_eq!(stats.pages_processed, 0);
        assert!(lines.is_empty());
    }

    #[test]
    fn single_worker() {
        let (stats, _) = run(5, 1, None);
        assert_eq!(stats.pages_parsed, 5);
    }
}
