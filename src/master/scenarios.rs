//! Whole-cluster scenarios: real slaves on loopback, driven through the
//! coordinators directly and through a client stub.

use std::path::PathBuf;

use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::ClientStub;
use crate::cluster::{
    ClusterConfig, ClusterState, ManifestTable, Shard, ShardManifest,
    SlaveDescriptor, SlaveDirectory,
};
use crate::master::{
    download, remove, upload, MasterServer, RemovalOutcome,
};
use crate::slave::SlaveServer;
use crate::utils::ShardError;

struct TestSlave {
    descriptor: SlaveDescriptor,
    tx_term: watch::Sender<bool>,
    handle: JoinHandle<Result<(), ShardError>>,
}

impl TestSlave {
    /// Stops accepting; returns once the listener is closed.
    async fn stop(self) {
        self.tx_term.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

async fn start_slaves(root: &tempfile::TempDir, n: usize) -> Vec<TestSlave> {
    let mut slaves = vec![];
    for i in 1..=n {
        let mut descriptor = SlaveDescriptor {
            id: format!("slave{}", i),
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: root.path().join(format!("slave{}", i)),
        };
        let mut server = SlaveServer::new_and_setup(&descriptor, None)
            .await
            .unwrap();
        descriptor.port = server.local_addr().unwrap().port();
        let (tx_term, rx_term) = watch::channel(false);
        let handle = tokio::spawn(async move { server.run(rx_term).await });
        slaves.push(TestSlave {
            descriptor,
            tx_term,
            handle,
        });
    }
    slaves
}

fn directory_of(slaves: &[TestSlave]) -> SlaveDirectory {
    SlaveDirectory::new(slaves.iter().map(|s| s.descriptor.clone()).collect())
}

/// A descriptor nothing listens on.
async fn dead_slave(id: &str) -> SlaveDescriptor {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    SlaveDescriptor {
        id: id.into(),
        host: "127.0.0.1".into(),
        port,
        storage_dir: PathBuf::from("/nonexistent"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_then_download() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 3).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new())
        .with_transfer_buf_size(2);

    let data = b"0123456789";
    let outcome = upload(&state, "digits.txt", 10, &mut &data[..]).await?;
    assert_eq!(outcome.bytes_transferred, 10);
    assert_eq!(
        outcome
            .manifest
            .shards
            .iter()
            .map(|s| s.byte_length)
            .collect::<Vec<_>>(),
        vec![3, 3, 4]
    );
    assert_eq!(outcome.manifest.owners(), vec!["slave1", "slave2", "slave3"]);

    for (slave, expect) in slaves.iter().zip([&b"012"[..], &b"345"[..], &b"6789"[..]]) {
        let blob =
            fs::read(slave.descriptor.storage_dir.join("digits.txt")).await?;
        assert_eq!(blob, expect);
    }
    assert_eq!(
        state.manifests().get("digits.txt").await,
        Some(outcome.manifest)
    );

    let fetched = download(&state, "digits.txt").await?;
    assert_eq!(fetched.file_size, 10);
    assert_eq!(&fetched.assemble()[..], &data[..]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_size_file() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 2).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());

    let outcome = upload(&state, "empty", 0, &mut &b""[..]).await?;
    assert_eq!(outcome.bytes_transferred, 0);
    assert_eq!(outcome.manifest.shards.len(), 2);
    for slave in slaves.iter() {
        let blob = fs::read(slave.descriptor.storage_dir.join("empty")).await?;
        assert!(blob.is_empty());
    }

    let fetched = download(&state, "empty").await?;
    assert_eq!(fetched.file_size, 0);
    assert!(fetched.assemble().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_upload_source() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 2).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());

    // announces 8 bytes but only has 5
    let result = upload(&state, "short", 8, &mut &b"abcde"[..]).await;
    assert!(matches!(
        result,
        Err(ShardError::TransferIncomplete { expected: 4, .. })
    ));
    assert_eq!(state.manifests().get("short").await, None);
    assert!(matches!(
        download(&state, "short").await,
        Err(ShardError::UnknownFile(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_with_slave_down() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let mut slaves = start_slaves(&root, 3).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());
    let parallel = state.clone().with_parallel_fanout(true);

    upload(&state, "data.bin", 10, &mut &b"abcdefghij"[..]).await?;
    slaves.remove(1).stop().await;

    assert_eq!(
        download(&state, "data.bin").await.unwrap_err(),
        ShardError::PartUnavailable(1)
    );
    assert_eq!(
        download(&parallel, "data.bin").await.unwrap_err(),
        ShardError::PartUnavailable(1)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_with_blob_lost() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 2).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());

    upload(&state, "lost", 6, &mut &b"uvwxyz"[..]).await?;
    fs::remove_file(slaves[1].descriptor.storage_dir.join("lost")).await?;
    assert_eq!(
        download(&state, "lost").await.unwrap_err(),
        ShardError::PartUnavailable(1)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_fanout_roundtrip() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 4).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new())
        .with_parallel_fanout(true);

    let data: Vec<u8> = (0..=255u8).cycle().take(10_007).collect();
    upload(&state, "big", data.len() as u64, &mut &data[..]).await?;
    let fetched = download(&state, "big").await?;
    assert_eq!(&fetched.assemble()[..], &data[..]);

    let results = remove(&state, "big").await?;
    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|r| r.outcome == RemovalOutcome::Deleted));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_twice() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 3).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());

    upload(&state, "gone", 9, &mut &b"123456789"[..]).await?;

    let results = remove(&state, "gone").await?;
    assert_eq!(
        results.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        vec![
            "slave1: part deleted",
            "slave2: part deleted",
            "slave3: part deleted"
        ]
    );
    for slave in slaves.iter() {
        assert!(!slave.descriptor.storage_dir.join("gone").exists());
    }

    let results = remove(&state, "gone").await?;
    assert!(results
        .iter()
        .all(|r| r.outcome == RemovalOutcome::NotFound));
    assert!(matches!(
        download(&state, "gone").await,
        Err(ShardError::UnknownFile(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_active_slaves() -> Result<(), ShardError> {
    let directory = SlaveDirectory::new(vec![
        dead_slave("slave1").await,
        dead_slave("slave2").await,
    ]);
    let manifests = ManifestTable::new();
    manifests
        .insert(ShardManifest::new(
            "known".into(),
            4,
            vec![Shard {
                index: 0,
                slave_id: "slave1".into(),
                byte_offset: 0,
                byte_length: 4,
            }],
        )?)
        .await?;
    let state = ClusterState::new(directory, manifests);

    assert_eq!(
        upload(&state, "new", 3, &mut &b"abc"[..]).await.unwrap_err(),
        ShardError::NoActiveSlaves
    );
    assert_eq!(
        download(&state, "known").await.unwrap_err(),
        ShardError::NoActiveSlaves
    );
    assert_eq!(
        remove(&state, "known").await.unwrap_err(),
        ShardError::NoActiveSlaves
    );
    // refused removal keeps the manifest
    assert!(state.manifests().get("known").await.is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_sessions_end_to_end() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 3).await;
    let listed = root.path().join("master");
    fs::create_dir(&listed).await?;
    fs::write(listed.join("b.txt"), b"b").await?;
    fs::write(listed.join("a.txt"), b"a").await?;

    let cluster = ClusterConfig {
        master_host: "127.0.0.1".into(),
        master_port: 0,
        storage_dir: Some(listed.clone()),
        slaves: directory_of(&slaves),
    };
    let mut master =
        MasterServer::new_and_setup(&cluster, Some("transfer_buf_size = 5"))
            .await?;
    let port = master.local_addr()?.port();
    let (tx_term, rx_term) = watch::channel(false);
    let master_handle = tokio::spawn(async move { master.run(rx_term).await });

    let mut client = ClientStub::connect("127.0.0.1", port).await?;
    assert_eq!(client.welcome(), "Welcome to the shardstore master");
    assert_eq!(client.listing().await?, "a.txt, b.txt");
    assert_eq!(
        client.raw_command("FROBNICATE").await?,
        "Unknown command: FROBNICATE"
    );

    // refused upload still leaves the session usable
    let refused = client.upload("../escape", 5, &mut &b"hello"[..]).await;
    assert!(matches!(refused, Err(ShardError::Msg(ref m)) if m.starts_with("ERROR")));

    let src = root.path().join("poem.txt");
    let poem = b"so much depends upon a red wheel barrow";
    fs::write(&src, poem).await?;
    let reply = client.upload_file(&src).await?;
    assert!(reply.starts_with("UPLOAD_DONE"));
    assert!(reply.contains("3 slave(s)"));

    let mut fetched: Vec<u8> = vec![];
    assert_eq!(
        client.download("poem.txt", &mut fetched).await?,
        poem.len() as u64
    );
    assert_eq!(&fetched[..], &poem[..]);

    // a second client sees the same files
    let mut other = ClientStub::connect("127.0.0.1", port).await?;
    let out = root.path().join("out");
    fs::create_dir(&out).await?;
    let (path, size) = other.download_to_dir("poem.txt", &out).await?;
    assert_eq!(size, poem.len() as u64);
    assert_eq!(fs::read(&path).await?, poem.to_vec());
    other.exit().await?;

    let lines = client.remove("poem.txt").await?;
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "slave1: part deleted");
    assert!(lines[3].starts_with("REMOVE_DONE"));

    let missing = client.download("poem.txt", &mut fetched).await;
    assert!(matches!(missing, Err(ShardError::Msg(ref m)) if m.contains("unknown file")));
    assert!(client.is_in_sync());

    assert_eq!(client.listing().await?, "a.txt, b.txt");
    client.exit().await?;

    tx_term.send(true).unwrap();
    master_handle.await.unwrap()?;
    Ok(())
}

/// Starts a master over given slaves, listing `storage_dir`.
async fn start_master(
    slaves: &[TestSlave],
    storage_dir: Option<PathBuf>,
) -> (u16, watch::Sender<bool>, JoinHandle<Result<(), ShardError>>) {
    let cluster = ClusterConfig {
        master_host: "127.0.0.1".into(),
        master_port: 0,
        storage_dir,
        slaves: directory_of(slaves),
    };
    let mut master = MasterServer::new_and_setup(&cluster, None).await.unwrap();
    let port = master.local_addr().unwrap().port();
    let (tx_term, rx_term) = watch::channel(false);
    let handle = tokio::spawn(async move { master.run(rx_term).await });
    (port, tx_term, handle)
}

/// Names of hidden partial files left in `dir`.
async fn leftover_parts(dir: &std::path::Path) -> Vec<String> {
    let mut names = vec![];
    let mut entries = fs::read_dir(dir).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            names.push(name);
        }
    }
    names
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_aborts_on_slave_failure() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 3).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());

    // slave2 is still up but can no longer write blobs
    fs::remove_dir_all(&slaves[1].descriptor.storage_dir).await?;

    let data = b"0123456789";
    let mut src = &data[..];
    let result = upload(&state, "doomed", 10, &mut src).await;
    assert!(matches!(
        result,
        Err(ShardError::LocalIo(_)) | Err(ShardError::SlaveUnreachable(_))
    ));

    // slave3's shard was never read from the client
    assert_eq!(src, &b"6789"[..]);
    // no rollback of the shard already stored
    assert_eq!(
        fs::read(slaves[0].descriptor.storage_dir.join("doomed")).await?,
        b"012".to_vec()
    );
    assert!(!slaves[2].descriptor.storage_dir.join("doomed").exists());
    assert_eq!(state.manifests().get("doomed").await, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_abort_keeps_session_framed() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 3).await;
    let listed = root.path().join("master");
    fs::create_dir(&listed).await?;
    fs::write(listed.join("notes.txt"), b"n").await?;
    let (port, tx_term, master_handle) =
        start_master(&slaves, Some(listed)).await;

    fs::remove_dir_all(&slaves[1].descriptor.storage_dir).await?;

    let mut client = ClientStub::connect("127.0.0.1", port).await?;
    let failed = client.upload("doomed", 10, &mut &b"0123456789"[..]).await;
    assert!(matches!(failed, Err(ShardError::Msg(ref m)) if m.starts_with("ERROR")));
    assert!(client.is_in_sync());
    assert_eq!(client.listing().await?, "notes.txt");

    let mut fetched: Vec<u8> = vec![];
    assert!(client.download("doomed", &mut fetched).await.is_err());
    assert!(fetched.is_empty());
    assert_eq!(client.listing().await?, "notes.txt");
    client.exit().await?;

    tx_term.send(true).unwrap();
    master_handle.await.unwrap()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_with_slave_down() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let mut slaves = start_slaves(&root, 3).await;
    let state = ClusterState::new(directory_of(&slaves), ManifestTable::new());

    upload(&state, "partly", 9, &mut &b"abcdefghi"[..]).await?;
    let stopped = slaves.remove(1);
    let stopped_blob = stopped.descriptor.storage_dir.join("partly");
    stopped.stop().await;

    let results = remove(&state, "partly").await?;
    assert_eq!(
        results.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        vec!["slave1: part deleted", "slave3: part deleted"]
    );
    assert_eq!(state.manifests().get("partly").await, None);
    // a slave that was down keeps its blob
    assert!(stopped_blob.exists());
    assert!(matches!(
        download(&state, "partly").await,
        Err(ShardError::UnknownFile(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_download_keeps_local_file() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 2).await;
    let (port, tx_term, master_handle) = start_master(&slaves, None).await;
    let out = root.path().join("out");
    fs::create_dir(&out).await?;
    fs::write(out.join("precious.txt"), b"my local work").await?;

    let mut client = ClientStub::connect("127.0.0.1", port).await?;
    assert!(client.download_to_dir("precious.txt", &out).await.is_err());
    assert_eq!(
        fs::read(out.join("precious.txt")).await?,
        b"my local work".to_vec()
    );
    assert!(leftover_parts(&out).await.is_empty());

    // a successful download does replace it
    client
        .upload("precious.txt", 6, &mut &b"remote"[..])
        .await?;
    let (path, size) = client.download_to_dir("precious.txt", &out).await?;
    assert_eq!(size, 6);
    assert_eq!(fs::read(&path).await?, b"remote".to_vec());
    assert!(leftover_parts(&out).await.is_empty());

    // names that would escape the directory are refused locally
    assert!(client.download_to_dir("../escape", &out).await.is_err());
    assert!(client.is_in_sync());
    client.exit().await?;

    tx_term.send(true).unwrap();
    master_handle.await.unwrap()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_failure_keeps_connection() -> Result<(), ShardError> {
    let root = tempfile::tempdir()?;
    let slaves = start_slaves(&root, 1).await;
    let listed = root.path().join("master");
    fs::create_dir(&listed).await?;
    let (port, tx_term, master_handle) =
        start_master(&slaves, Some(listed)).await;

    let mut client = ClientStub::connect("127.0.0.1", port).await?;
    let missing = root.path().join("no-such-file.txt");
    assert!(client.upload_file(&missing).await.is_err());
    assert!(client.is_in_sync());
    assert_eq!(client.listing().await?, "No files available.");

    // a local file shorter than announced breaks the framing
    let broken = client.upload("short", 8, &mut &b"abc"[..]).await;
    assert!(broken.is_err());
    assert!(!client.is_in_sync());

    tx_term.send(true).unwrap();
    master_handle.await.unwrap()?;
    Ok(())
}
