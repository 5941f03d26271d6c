mod common;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chorus::raft::{AppendDataRequest, LogEntry, NodeRole, Raft, RaftError, RaftTransport};
use chorus::storage::SledStorage;
use common::{eventually, fast_config, Cluster, Monotonic, Unreachable};
use tempfile::TempDir;
use tokio::time::sleep;

fn data(s: &str) -> AppendDataRequest {
    AppendDataRequest {
        data: s.as_bytes().to_vec(),
    }
}

fn bytes(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_elect_one_leader_and_agree_on_it() {
    let cluster = Cluster::start(3);
    let all = cluster.all();

    let (leader, term) = cluster.wait_for_leader(&all, 0).await;

    let (c, ids, lead) = (&cluster, &all, &leader);
    let agreed = eventually(Duration::from_secs(3), move || async move {
        let snapshots = c.snapshots(ids).await;
        let agree = snapshots.len() == 3
            && snapshots.values().all(|s| {
                s.current_term == term && s.current_leader.as_deref() == Some(lead.as_str())
            });
        agree.then_some(())
    })
    .await;
    assert!(agreed.is_some(), "followers never recognised {leader}");

    // Election safety: never two leaders in the same term. Terms and commit
    // indices only move forward.
    let mut leaders_by_term: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();
    let mut progress = Monotonic::default();
    for _ in 0..25 {
        for (id, s) in cluster.snapshots(&all).await {
            progress.observe(&id, &s);
            if s.role == NodeRole::Leader {
                leaders_by_term.entry(s.current_term).or_default().insert(id);
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    for (term, leaders) in &leaders_by_term {
        assert_eq!(leaders.len(), 1, "term {term} had leaders {leaders:?}");
    }

    cluster.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_replicate_and_apply_in_order_everywhere() {
    let cluster = Cluster::start(3);
    let all = cluster.all();
    let (leader, _) = cluster.wait_for_leader(&all, 0).await;
    let follower = all.iter().copied().find(|id| *id != leader).unwrap();

    assert!(cluster.node(&leader).append_data(data("a")).await.unwrap().success);
    assert!(cluster.node(&leader).append_data(data("b")).await.unwrap().success);

    // Wait until the follower knows the leader, then write through it.
    let (c, lead) = (&cluster, &leader);
    eventually(Duration::from_secs(2), move || async move {
        let s = c.node(follower).get_snapshot().await.ok()?;
        s.current_leader.filter(|l| l == lead)
    })
    .await
    .expect("follower learns leader");
    assert!(cluster.node(follower).append_data(data("c")).await.unwrap().success);

    let expected = bytes(&["a", "b", "c"]);
    let (ids, want) = (&all, &expected);
    let converged = eventually(Duration::from_secs(3), move || async move {
        ids.iter().all(|id| c.applied(id) == *want).then_some(())
    })
    .await;
    assert!(
        converged.is_some(),
        "applied: {:?}",
        all.iter().map(|id| cluster.applied(id)).collect::<Vec<_>>()
    );

    let snapshots = cluster.snapshots(&all).await;
    for s in snapshots.values() {
        assert_eq!(s.commit_index, 3);
        assert_eq!(s.last_applied, 3);
        assert_eq!(s.last_log_index(), 3);
    }

    let leader_node = cluster.node(&leader);
    eventually(Duration::from_secs(2), move || async move {
        let view = leader_node.get_snapshot().await.ok()?;
        let caught_up = view.match_index.values().all(|&m| m == 3)
            && view.next_index.values().all(|&n| n == 4);
        caught_up.then_some(())
    })
    .await
    .expect("leader sees every follower caught up");

    cluster.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn minority_leader_cannot_commit_and_is_overwritten_after_heal() {
    let cluster = Cluster::start(5);
    let all = cluster.all();
    let (old_leader, old_term) = cluster.wait_for_leader(&all, 0).await;
    let (c, ids) = (&cluster, &all);

    assert!(cluster.node(&old_leader).append_data(data("before")).await.unwrap().success);
    eventually(Duration::from_secs(3), move || async move {
        ids.iter()
            .all(|id| c.applied(id) == bytes(&["before"]))
            .then_some(())
    })
    .await
    .expect("first write committed");

    let others: Vec<&str> = all.iter().copied().filter(|id| *id != old_leader).collect();
    let minority = [old_leader.as_str(), others[0]];
    let majority = [others[1], others[2], others[3]];
    cluster.partition(&[&minority[..], &majority[..]]);

    // Accepted into the old leader's log, but it can never reach a quorum.
    assert!(cluster.node(&old_leader).append_data(data("lost")).await.unwrap().success);

    let (new_leader, new_term) = cluster.wait_for_leader(&majority, old_term).await;
    assert!(new_term > old_term);
    assert!(cluster.node(&new_leader).append_data(data("after")).await.unwrap().success);

    let group = &majority;
    eventually(Duration::from_secs(3), move || async move {
        group
            .iter()
            .all(|id| c.applied(id) == bytes(&["before", "after"]))
            .then_some(())
    })
    .await
    .expect("majority commits new write");

    let stale = cluster.node(&old_leader).get_snapshot().await.unwrap();
    assert_eq!(stale.commit_index, 1);
    assert_eq!(stale.last_log_index(), 2);
    assert_eq!(cluster.applied(&old_leader), bytes(&["before"]));

    cluster.heal();

    let mut progress = Monotonic::default();
    for _ in 0..20 {
        for (id, s) in cluster.snapshots(&all).await {
            progress.observe(&id, &s);
        }
        sleep(Duration::from_millis(25)).await;
    }

    let converged = eventually(Duration::from_secs(5), move || async move {
        let snapshots = c.snapshots(ids).await;
        let logs: BTreeSet<Vec<(u64, u64)>> = snapshots
            .values()
            .map(|s| s.logs.iter().map(|l| (l.index, l.term)).collect())
            .collect();
        let applied_ok = ids
            .iter()
            .all(|id| c.applied(id) == bytes(&["before", "after"]));
        (snapshots.len() == 5 && logs.len() == 1 && applied_ok).then_some(snapshots)
    })
    .await
    .expect("cluster converges after heal");

    let old = &converged[&old_leader];
    assert_ne!(old.role, NodeRole::Leader);
    assert!(old.current_term >= new_term);

    cluster.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_without_known_leader_fails() {
    let ids = vec!["n1".to_string(), "n2".to_string(), "n3".to_string()];
    let mut config = fast_config("n1", &ids);
    // Never campaign during the test.
    config.election_timeout_min = 60_000;

    let mut peers: HashMap<String, Arc<dyn RaftTransport>> = HashMap::new();
    for id in &ids[1..] {
        peers.insert(id.clone(), Arc::new(Unreachable));
    }
    let raft = Raft::start(
        config,
        chorus::storage::MemoryStorage::new(),
        peers,
        |_: &LogEntry| -> anyhow::Result<()> { Ok(()) },
    )
    .unwrap();

    assert!(matches!(
        raft.append_data(data("x")).await,
        Err(RaftError::NoLeader)
    ));

    raft.close();
    raft.join().await.unwrap();
    assert!(matches!(raft.get_snapshot().await, Err(RaftError::Stopped)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_node_keeps_state_across_restart() {
    let tmp = TempDir::new().expect("tempdir");
    let ids = vec!["solo".to_string()];

    let applied = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let sink = Arc::clone(&applied);
        let raft = Raft::start(
            fast_config("solo", &ids),
            SledStorage::open(tmp.path()).unwrap(),
            HashMap::new(),
            move |entry: &LogEntry| -> anyhow::Result<()> {
                sink.lock().unwrap().push(entry.index);
                Ok(())
            },
        )
        .unwrap();

        let node = &raft;
        eventually(Duration::from_secs(3), move || async move {
            node.get_snapshot().await.ok().filter(|s| s.is_leader())
        })
        .await
        .expect("solo node elects itself");

        raft.append_data(data("one")).await.unwrap();
        raft.append_data(data("two")).await.unwrap();
        eventually(Duration::from_secs(2), move || async move {
            node.get_snapshot().await.ok().filter(|s| s.last_applied == 2)
        })
        .await
        .expect("entries applied");

        raft.close();
        raft.join().await.unwrap();
    }
    assert_eq!(*applied.lock().unwrap(), vec![1, 2]);

    let reapplied = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&reapplied);
    let raft = Raft::start(
        fast_config("solo", &ids),
        SledStorage::open(tmp.path()).unwrap(),
        HashMap::new(),
        move |entry: &LogEntry| -> anyhow::Result<()> {
            sink.lock().unwrap().push(entry.index);
            Ok(())
        },
    )
    .unwrap();

    let snapshot = raft.get_snapshot().await.unwrap();
    assert!(snapshot.current_term >= 1);
    assert_eq!(snapshot.commit_index, 2);
    assert_eq!(snapshot.last_applied, 2);
    assert_eq!(snapshot.last_log_index(), 2);
    assert!(reapplied.lock().unwrap().is_empty());

    raft.close();
    raft.join().await.unwrap();
}
