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

use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use rqueue_storage::{
    FlushMode, Index, IndexStats, Queue, QueueBuilder, QueueError, ReplicationClient,
    ReplicationClientConfig, ReplicationSource,
    path::{index_file_path, segment_file_path},
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn open(path: &Path, capacity: u32) -> Queue {
    QueueBuilder::new(path)
        .segment_capacity(capacity)
        .flush_mode(FlushMode::Os)
        .heartbeat_interval(Duration::from_millis(100))
        .build()
        .unwrap()
}

#[test]
fn test_push_pop_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path(), 1024 * 1024);

    queue.push(b"abc").unwrap();
    queue.push(b"def").unwrap();

    assert_eq!(queue.pop().unwrap(), Bytes::from_static(b"abc"));
    assert_eq!(queue.pop().unwrap(), Bytes::from_static(b"def"));
    assert!(matches!(queue.pop(), Err(QueueError::Empty)));
}

#[test]
fn test_pop_on_fresh_queue() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path(), 1024 * 1024);

    assert!(matches!(queue.pop(), Err(QueueError::Empty)));
    assert_eq!(queue.index().stats(), IndexStats::default());
}

#[test]
fn test_exact_fill_then_rotate() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .flush_mode(FlushMode::Os)
        .build()
        .unwrap();
    let payload = vec![0x5Au8; 1020];

    for _ in 0..1024 {
        queue.push(&payload).unwrap();
    }
    assert_eq!(queue.index().write_segment(), 1);
    assert_eq!(queue.index().write_offset(), 1_048_576);

    assert_eq!(queue.push(&payload).unwrap(), 1025);
    assert_eq!(queue.index().write_segment(), 2);
    assert_eq!(queue.index().write_offset(), 1024);
    assert_eq!(
        std::fs::metadata(segment_file_path(temp_dir.path(), 1))
            .unwrap()
            .len(),
        1_048_576
    );
}

#[test]
fn test_payload_of_a_whole_segment() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .flush_mode(FlushMode::Os)
        .build()
        .unwrap();
    let big = vec![7u8; 1024 * 1024];

    queue.push(b"small").unwrap();
    queue.push(&big).unwrap();
    queue.push(&big).unwrap();
    assert_eq!(queue.index().write_segment(), 2);

    drop(queue);
    let queue = QueueBuilder::new(temp_dir.path()).build().unwrap();
    assert_eq!(queue.pop().unwrap().as_ref(), b"small");
    assert_eq!(queue.pop().unwrap(), big);
    assert_eq!(queue.pop().unwrap(), big);
    assert!(matches!(queue.pop(), Err(QueueError::Empty)));
}

#[test]
fn test_fifo_across_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path(), 256);

    for i in 0..200 {
        queue.push(format!("message-{i:04}").as_bytes()).unwrap();
    }
    assert!(queue.index().write_segment() > 5);

    for i in 0..200 {
        assert_eq!(queue.pop().unwrap().as_ref(), format!("message-{i:04}").as_bytes());
    }
    assert!(matches!(queue.pop(), Err(QueueError::Empty)));
    assert_eq!(queue.len(), 0);
}

#[test]
fn test_reopen_resumes_at_next_unpopped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();

    {
        let queue = open(&path, 256);
        for i in 0..50 {
            queue.push(format!("msg-{i}").as_bytes()).unwrap();
        }
        for i in 0..20 {
            assert_eq!(queue.pop().unwrap().as_ref(), format!("msg-{i}").as_bytes());
        }
    }

    {
        let queue = open(&path, 256);
        assert_eq!(queue.len(), 30);
        assert_eq!(queue.pop().unwrap().as_ref(), b"msg-20");

        queue.push(b"after-restart").unwrap();
        for i in 21..50 {
            assert_eq!(queue.pop().unwrap().as_ref(), format!("msg-{i}").as_bytes());
        }
        assert_eq!(queue.pop().unwrap().as_ref(), b"after-restart");
        assert!(matches!(queue.pop(), Err(QueueError::Empty)));
    }
}

#[test]
fn test_concurrent_push_and_pop() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(open(temp_dir.path(), 4096));
    const COUNT: u32 = 2000;

    let producer = {
        let queue = queue.clone();
        std::thread::spawn(move || {
            for i in 0..COUNT {
                queue.push(&i.to_be_bytes()).unwrap();
            }
        })
    };

    let mut expected = 0u32;
    while expected < COUNT {
        match queue.pop() {
            Ok(payload) => {
                assert_eq!(payload.as_ref(), expected.to_be_bytes());
                expected += 1;
            }
            Err(QueueError::Empty) => std::thread::yield_now(),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    producer.join().unwrap();
    assert!(queue.is_empty());
}

/// Wait until the follower's index and active segment match the master's.
async fn wait_for_convergence(master: &Queue, master_dir: &Path, follower_dir: &Path) {
    let expected = master.index().stats();
    let active = std::fs::read(segment_file_path(master_dir, expected.write_segment)).unwrap();
    let converged = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let index = Index::read_snapshot(index_file_path(follower_dir)).ok();
            let segment = std::fs::read(segment_file_path(follower_dir, expected.write_segment)).ok();
            if index == Some(expected) && segment.as_ref() == Some(&active) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "follower never reached {expected:?}");
}

#[tokio::test]
async fn test_replication_converges() {
    let master_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();
    let master = Arc::new(open(master_dir.path(), 256));

    for i in 0..40 {
        master.push(format!("before-{i}").as_bytes()).unwrap();
    }
    for _ in 0..5 {
        master.pop().unwrap();
    }

    let (tx, mut rx) = mpsc::channel::<Bytes>(64);
    let cancel = CancellationToken::new();

    let source = {
        let master = master.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ReplicationSource::new(master).run(&tx, cancel).await })
    };
    let follower = {
        let dir = follower_dir.path().to_path_buf();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let config = ReplicationClientConfig {
                segment_capacity: 256,
                flush_mode: FlushMode::Os,
                ..Default::default()
            };
            let mut client = ReplicationClient::new(dir, config).unwrap();
            client.run(&mut rx, &cancel).await.map(|()| client.applied())
        })
    };

    wait_for_convergence(&master, master_dir.path(), follower_dir.path()).await;

    for i in 0..40 {
        master.push(format!("after-{i}").as_bytes()).unwrap();
    }
    master.pop().unwrap();
    wait_for_convergence(&master, master_dir.path(), follower_dir.path()).await;

    // Every segment from the read cursor onwards is byte-identical.
    let index = master.index().stats();
    for id in index.read_segment..=index.write_segment {
        assert_eq!(
            std::fs::read(segment_file_path(master_dir.path(), id)).unwrap(),
            std::fs::read(segment_file_path(follower_dir.path(), id)).unwrap(),
            "segment {id}"
        );
    }

    cancel.cancel();
    source.await.unwrap().unwrap();
    assert!(follower.await.unwrap().unwrap() > 0);
}
