//! End-to-end swarm download tests over the in-process transport
//!
//! These tests wire a real [`DataDownloader`] to scripted seed peers through
//! a [`MemoryHub`] and exercise the full message flow: metadata discovery,
//! rarest-first chunk scheduling, hedged requests around stalled peers, and
//! final assembly.

use std::sync::Arc;
use std::time::Duration;

use swarm_fetcher::downloader::{DataDownloader, DownloaderConfig};
use swarm_fetcher::protocol::{DatasetId, WireMessage};
use swarm_fetcher::transport::memory::{MemoryHub, SeedConfig, SeedPeer};
use swarm_fetcher::transport::PeerId;

const CHUNK: u32 = 26_000;

fn dataset_bytes(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i * 31 % 251) as u8).collect()
}

fn downloader_for(
    hub: &MemoryHub,
    dataset_id: DatasetId,
    seeds: &[&SeedPeer],
) -> DataDownloader {
    let transport = hub.attach(PeerId::random());
    DataDownloader::new(
        dataset_id,
        Arc::new(transport),
        seeds.iter().map(|seed| seed.peer()).collect(),
        DownloaderConfig::for_testing(),
    )
}

#[tokio::test]
async fn test_single_seed_download() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(100_000);

    let seed = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
    );
    let downloader = downloader_for(&hub, dataset_id, &[&seed]);

    assert!(downloader.download(5).await);
    assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);

    // 100,000 bytes at 26,000 per chunk: four requests, four replies,
    // short final chunk included
    let status = downloader.status().await;
    assert!(status.completed);
    assert_eq!(status.chunk_requests_sent, 4);
    assert_eq!(status.chunk_replies_received, 4);

    let info = downloader.downloaded_info().await.unwrap();
    assert!(info.all_available);
    assert_eq!(info.chunk_count(), 4);
    assert_eq!(info.chunk_len(3), 22_000);
}

#[tokio::test]
async fn test_small_dataset_stays_in_memory_and_large_spills() {
    // below the 50,000 byte threshold on one side, above on the other; both
    // must assemble byte-identically
    for length in [10_000usize, 120_000] {
        let hub = MemoryHub::new();
        let dataset_id = DatasetId::random();
        let data = dataset_bytes(length);

        let seed = SeedPeer::spawn(
            &hub,
            dataset_id,
            data.clone(),
            WireMessage::new(),
            SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
        );
        let downloader = downloader_for(&hub, dataset_id, &[&seed]);

        assert!(downloader.download(5).await, "length {length}");
        assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);
    }
}

#[tokio::test]
async fn test_partial_seeds_cover_the_dataset_together() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(100_000);

    // no seed has everything; together they cover all four chunks
    let seeds: Vec<SeedPeer> = [vec![0usize, 3], vec![1], vec![2, 3]]
        .into_iter()
        .map(|chunks| {
            SeedPeer::spawn(
                &hub,
                dataset_id,
                data.clone(),
                WireMessage::new(),
                SeedConfig {
                    chunk_size: CHUNK,
                    available: Some(chunks),
                    ..SeedConfig::default()
                },
            )
        })
        .collect();

    let seed_refs: Vec<&SeedPeer> = seeds.iter().collect();
    let downloader = downloader_for(&hub, dataset_id, &seed_refs);

    assert!(downloader.download(5).await);
    assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);
}

#[tokio::test]
async fn test_download_file_round_trip_and_existing_target() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(60_000);

    let seed = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
    );
    let downloader = downloader_for(&hub, dataset_id, &[&seed]);

    let dir = tempfile::TempDir::new().unwrap();
    let target = dir.path().join("dataset.bin");
    assert!(downloader.download_file(&target, 5).await);
    assert_eq!(std::fs::read(&target).unwrap(), data);

    // a second copy onto the same non-empty target must fail
    let second = downloader_for(&hub, dataset_id, &[&seed]);
    assert!(!second.download_file(&target, 5).await);
    assert_eq!(std::fs::read(&target).unwrap(), data);
}

#[tokio::test]
async fn test_stalled_swarm_times_out() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();

    // answers metadata but never delivers a chunk
    let seed = SeedPeer::spawn(
        &hub,
        dataset_id,
        dataset_bytes(60_000),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, serve_chunks: false, ..SeedConfig::default() },
    );
    let downloader = downloader_for(&hub, dataset_id, &[&seed]);

    assert!(!downloader.download(1).await);
    let status = downloader.status().await;
    assert!(!status.completed);
    assert!(status.issues.contains("Timeout"));
}

#[tokio::test]
async fn test_dead_man_routes_around_a_stalled_seed() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(100_000);

    // one healthy seed and one that swallows every chunk request; the small
    // delay keeps the healthy seed from racing through every chunk before
    // the stalled one is handed its request
    let healthy = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig {
            chunk_size: CHUNK,
            response_delay: Duration::from_millis(10),
            ..SeedConfig::default()
        },
    );
    let stalled = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, serve_chunks: false, ..SeedConfig::default() },
    );

    let downloader = downloader_for(&hub, dataset_id, &[&healthy, &stalled]);

    // completes despite the stalled seed: the dead-man pass re-issues its
    // outstanding range through the healthy one
    assert!(downloader.download(5).await);
    assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);

    // the hedge shows up as one extra chunk request beyond the chunk count
    let status = downloader.status().await;
    assert!(status.chunk_requests_sent >= 5, "expected a hedged request, saw {}", status.chunk_requests_sent);
}

#[tokio::test]
async fn test_add_provider_mid_flight() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(60_000);

    let seed = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
    );

    // start with no candidates at all
    let downloader = downloader_for(&hub, dataset_id, &[]);
    downloader.start().await;
    assert_eq!(downloader.provider_count().await, 0);

    assert!(downloader.add_provider(seed.peer()).await);
    assert!(!downloader.add_provider(seed.peer()).await, "duplicate peer must be rejected");

    let mut completion = downloader.completion();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !*completion.borrow() {
            completion.changed().await.unwrap();
        }
    })
    .await
    .expect("download should complete after the provider joined");

    assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);
}

#[tokio::test]
async fn test_no_info_seed_is_tolerated() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(60_000);

    let clueless = SeedPeer::spawn(
        &hub,
        dataset_id,
        Vec::new(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, reply_no_info: true, ..SeedConfig::default() },
    );
    let seed = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
    );

    let downloader = downloader_for(&hub, dataset_id, &[&clueless, &seed]);
    assert!(downloader.download(5).await);
    assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);

    let status = downloader.status().await;
    assert!(status.providers_not_found >= 1);
}

#[tokio::test]
async fn test_conflicting_length_seed_is_excluded() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();
    let data = dataset_bytes(60_000);

    let honest = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
    );
    let liar = SeedPeer::spawn(
        &hub,
        dataset_id,
        data.clone(),
        WireMessage::new(),
        SeedConfig {
            chunk_size: CHUNK,
            advertised_length: Some(999_999),
            // make sure the honest metadata establishes the geometry first
            response_delay: Duration::from_millis(20),
            ..SeedConfig::default()
        },
    );

    let downloader = downloader_for(&hub, dataset_id, &[&honest, &liar]);
    assert!(downloader.download(5).await);
    assert_eq!(downloader.downloaded_bytes().await.unwrap(), data);
}

#[tokio::test]
async fn test_extra_info_fingerprint_must_match() {
    let hub = MemoryHub::new();
    let dataset_id = DatasetId::random();

    let mut other_tile = WireMessage::new();
    other_tile.append_str("tile-9-9");
    let seed = SeedPeer::spawn(
        &hub,
        dataset_id,
        dataset_bytes(10_000),
        other_tile,
        SeedConfig { chunk_size: CHUNK, ..SeedConfig::default() },
    );

    // the downloader asks for a different tile of the same dataset id
    let mut wanted_tile = WireMessage::new();
    wanted_tile.append_str("tile-1-1");
    let transport = hub.attach(PeerId::random());
    let downloader = DataDownloader::with_details(
        dataset_id,
        Arc::new(transport),
        vec![seed.peer()],
        wanted_tile,
        None,
        DownloaderConfig::for_testing(),
    );

    // the seed's metadata never matches the fingerprint, so nothing starts
    assert!(!downloader.download(1).await);
    assert!(downloader.downloaded_bytes().await.is_err());
}
