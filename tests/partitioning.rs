use gateway_lib::domain::topic::Topic;
use gateway_lib::{BrokerClient, MemoryBroker, Publisher};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;

async fn three_partition_publisher() -> (Arc<MemoryBroker>, Publisher) {
    let broker = Arc::new(MemoryBroker::new(1));
    broker.create_topic(&Topic::new("spread", 3)).await.unwrap();
    (broker.clone(), Publisher::new(broker))
}

#[tokio::test]
async fn keyless_messages_cover_every_partition() {
    let (broker, publisher) = three_partition_publisher().await;

    let mut per_partition: BTreeMap<i32, usize> = BTreeMap::new();
    for i in 0..4 {
        let result = publisher
            .send("spread", format!("m{}", i), None)
            .await
            .unwrap();
        *per_partition.entry(result.partition.unwrap()).or_default() += 1;
    }

    assert_eq!(per_partition.len(), 3);
    assert!(per_partition.values().all(|&n| n >= 1));
    let stored: usize = (0..3).map(|p| broker.partition_len("spread", p)).sum();
    assert_eq!(stored, 4);
}

#[tokio::test]
async fn keyed_messages_map_deterministically() {
    let (_, first) = three_partition_publisher().await;
    let (_, second) = three_partition_publisher().await;

    for key in ["alice", "bob", "carol", "dave"] {
        let a = first
            .send("spread", "x", Some(key.to_string()))
            .await
            .unwrap();
        let again = first
            .send("spread", "y", Some(key.to_string()))
            .await
            .unwrap();
        let b = second
            .send("spread", "z", Some(key.to_string()))
            .await
            .unwrap();

        assert_eq!(a.partition, again.partition);
        assert_eq!(a.partition, b.partition);
    }
}

#[tokio::test]
async fn offsets_are_independent_per_partition() {
    let (_, publisher) = three_partition_publisher().await;

    let mut offsets: BTreeMap<i32, Vec<i64>> = BTreeMap::new();
    for i in 0..6 {
        let result = publisher
            .send("spread", format!("m{}", i), None)
            .await
            .unwrap();
        offsets
            .entry(result.partition.unwrap())
            .or_default()
            .push(result.offset.unwrap());
    }

    for (_, seen) in offsets {
        assert_eq!(seen, vec![0, 1]);
    }
}
