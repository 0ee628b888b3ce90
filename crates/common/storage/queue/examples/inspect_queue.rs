// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Offline dump of a queue directory: the index cursors, then every record of
//! every segment with the read and write cursors marked.
//!
//! ```text
//! cargo run -p rqueue-storage --example inspect_queue -- /var/lib/rqueue/orders --payloads
//! ```
//!
//! Opens segments read-only and never touches the index, so it is safe to run
//! next to a live queue.

use std::path::PathBuf;

use clap::Parser;
use rqueue_storage::{
    Index, Segment,
    path::{index_file_path, scan_segment_ids},
};
use snafu::{ResultExt, Whatever};

#[derive(Debug, Parser)]
#[command(name = "inspect_queue", about = "Dump the index and segments of a queue directory")]
struct Cli {
    /// Queue directory holding `queue.idx` and the segment files.
    dir:      PathBuf,
    /// Only dump this segment.
    #[arg(long)]
    segment:  Option<u32>,
    /// Print a preview of each payload.
    #[arg(long)]
    payloads: bool,
}

const PREVIEW: usize = 32;

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let index = Index::read_snapshot(index_file_path(&cli.dir))
        .with_whatever_context(|_| format!("reading index in {}", cli.dir.display()))?;
    println!(
        "index: read {}:{} write {}:{} length {}",
        index.read_segment, index.read_offset, index.write_segment, index.write_offset, index.length
    );

    let ids = scan_segment_ids(&cli.dir).whatever_context("scanning segments")?;
    let mut total = 0u64;
    for id in ids.into_iter().filter(|id| cli.segment.is_none_or(|only| only == *id)) {
        let segment = Segment::open_sealed(&cli.dir, id, u32::MAX)
            .with_whatever_context(|_| format!("opening segment {id}"))?;
        println!("segment {id}: {} bytes", segment.write_pos());

        let mut records = 0u64;
        for record in segment.records().whatever_context("reading segment")? {
            let (at, payload) = match record {
                Ok(record) => record,
                Err(err) => {
                    println!("  !! {err}");
                    break;
                }
            };
            let mut marks = String::new();
            if (id, at) == (index.read_segment, index.read_offset) {
                marks.push_str(" <- read");
            }
            if cli.payloads {
                let shown = &payload[..payload.len().min(PREVIEW)];
                let ellipsis = if payload.len() > PREVIEW { "..." } else { "" };
                println!(
                    "  @{at:>10} len {:>8}  \"{}{ellipsis}\"{marks}",
                    payload.len(),
                    String::from_utf8_lossy(shown).escape_debug()
                );
            } else {
                println!("  @{at:>10} len {:>8}{marks}", payload.len());
            }
            records += 1;
        }
        if id == index.write_segment {
            println!("  @{:>10} <- write", index.write_offset);
        }
        total += records;
    }

    println!("{total} records on disk, {} pending", index.length);
    Ok(())
}
