mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use common::{addresses, eventually, init_logging, next, next_values, stays_quiet};
use mom_multicast::{
    //
    ChannelBuilder,
    ChannelError,
    ChannelState,
    EndpointRegistry,
    Message,
    MulticastChannel,
    Notification,
    Observer,
    Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SensorReading {
    sensor: String,
    celsius: f64,
    tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Alpha {
    id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Beta {
    name: String,
}

mod a_rather_long_module_name_that_keeps_going_well_past_any_topic_width {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AnExtremelyLongMessageTypeNameThatSharesItsPrefixWithItsSibling1 {
        pub value: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AnExtremelyLongMessageTypeNameThatSharesItsPrefixWithItsSibling2 {
        pub value: u32,
    }
}

fn multicast<T: Message>(
    registry: &Arc<EndpointRegistry>,
    address: &str,
) -> Result<MulticastChannel<T>> {
    ChannelBuilder::new()
        .address(address)
        .registry(registry.clone())
        .multicast::<T>()
}

// Pushes in a burst never yield, so the queues must hold the whole burst.
fn burst_multicast<T: Message>(
    registry: &Arc<EndpointRegistry>,
    address: &str,
    burst: usize,
) -> Result<MulticastChannel<T>> {
    ChannelBuilder::new()
        .address(address)
        .registry(registry.clone())
        .send_high_water_mark(burst)
        .multicast::<T>()
}

#[tokio::test]
async fn test_five_values_arrive_in_order() -> Result<()> {
    // ---
    init_logging();

    for address in addresses("five-values") {
        // Arrange
        let registry = EndpointRegistry::new();
        let channel = multicast::<u32>(&registry, &address)?;
        let (_subscription, mut stream) = channel.subscribe_stream().await?;

        // Act
        for value in 1..=5 {
            channel.push(&value).await?;
        }

        // Assert
        assert_eq!(next_values(&mut stream, 5).await, vec![1, 2, 3, 4, 5], "{address}");
    }
    Ok(())
}

#[tokio::test]
async fn test_struct_payloads_round_trip() -> Result<()> {
    // ---
    for address in addresses("structs") {
        let registry = EndpointRegistry::new();
        let channel = multicast::<SensorReading>(&registry, &address)?;
        let (_subscription, mut stream) = channel.subscribe_stream().await?;
        let reading = SensorReading {
            sensor: "env-42".into(),
            celsius: 21.5,
            tags: vec!["lab".into(), "north".into()],
        };

        channel.push(&reading).await?;

        assert_eq!(next(&mut stream).await, Notification::Next(reading));
    }
    Ok(())
}

#[tokio::test]
async fn test_long_type_names_do_not_collide() -> Result<()> {
    // ---
    use a_rather_long_module_name_that_keeps_going_well_past_any_topic_width::{
        AnExtremelyLongMessageTypeNameThatSharesItsPrefixWithItsSibling1 as First,
        AnExtremelyLongMessageTypeNameThatSharesItsPrefixWithItsSibling2 as Second,
    };

    for address in addresses("long-names") {
        let registry = EndpointRegistry::new();
        let first = multicast::<First>(&registry, &address)?;
        let second = multicast::<Second>(&registry, &address)?;
        assert_ne!(first.topic(), second.topic());

        let (_a, mut first_stream) = first.subscribe_stream().await?;
        let (_b, mut second_stream) = second.subscribe_stream().await?;

        first.push(&First { value: 1 }).await?;

        assert_eq!(
            next(&mut first_stream).await,
            Notification::Next(First { value: 1 })
        );
        assert!(stays_quiet(&mut second_stream).await, "{address}");
    }
    Ok(())
}

#[tokio::test]
async fn test_values_pushed_before_subscribe_are_not_replayed() -> Result<()> {
    // ---
    for address in addresses("no-replay") {
        let registry = EndpointRegistry::new();
        let channel = multicast::<u32>(&registry, &address)?;

        channel.push(&1).await?;
        let (_subscription, mut stream) = channel.subscribe_stream().await?;
        channel.push(&2).await?;

        assert_eq!(next(&mut stream).await, Notification::Next(2), "{address}");
        assert!(stays_quiet(&mut stream).await);
    }
    Ok(())
}

#[tokio::test]
async fn test_fanout_reaches_three_subscribers() -> Result<()> {
    // ---
    for address in addresses("fanout") {
        let registry = EndpointRegistry::new();
        let channel = multicast::<String>(&registry, &address)?;
        let mut streams = Vec::new();
        for _ in 0..3 {
            streams.push(channel.subscribe_stream().await?);
        }

        channel.push(&"hello".to_string()).await?;

        for (_subscription, stream) in streams.iter_mut() {
            assert_eq!(next(stream).await, Notification::Next("hello".to_string()));
        }
        assert_eq!(channel.observer_count(), 3);
    }
    Ok(())
}

#[tokio::test]
async fn test_error_reaches_on_error_once() -> Result<()> {
    // ---
    for address in addresses("on-error") {
        // Arrange
        let registry = EndpointRegistry::new();
        let channel = multicast::<u32>(&registry, &address)?;
        let nexts = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        {
            let nexts = nexts.clone();
            let errors = errors.clone();
            let completions = completions.clone();
            channel
                .subscribe_with(
                    move |_| {
                        nexts.fetch_add(1, Ordering::SeqCst);
                    },
                    move |err| errors.lock().push(err.to_string()),
                    move || {
                        completions.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await?;
        }

        // Act
        channel.error("passed").await?;
        channel.push(&1).await?;
        channel.complete().await?;

        // Assert
        assert_eq!(*errors.lock(), vec!["passed".to_string()]);
        assert_eq!(channel.state(), ChannelState::Faulted);
        assert_eq!(nexts.load(Ordering::SeqCst), 0);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_complete_reaches_every_observer_once() -> Result<()> {
    // ---
    for address in addresses("on-completed") {
        let registry = EndpointRegistry::new();
        let channel = multicast::<u32>(&registry, &address)?;
        let (_a, mut first) = channel.subscribe_stream().await?;
        let (_b, mut second) = channel.subscribe_stream().await?;

        channel.complete().await?;
        channel.complete().await?;
        channel.error("too late").await?;

        for stream in [&mut first, &mut second] {
            assert_eq!(next(stream).await, Notification::Completed);
            assert_eq!(stream.recv().await, None);
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_disposed_subscriber_misses_all_values() -> Result<()> {
    // ---
    for address in addresses("dispose-one") {
        // Arrange
        let registry = EndpointRegistry::new();
        let channel = burst_multicast::<u32>(&registry, &address, 1000)?;
        let (_kept, mut stream) = channel.subscribe_stream().await?;
        let disposed_count = Arc::new(AtomicUsize::new(0));
        let counter = disposed_count.clone();
        let disposed = channel
            .subscribe(Observer::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await?;
        disposed.dispose();

        // Act
        for value in 0..1000 {
            channel.push(&value).await?;
        }

        // Assert
        let received = next_values(&mut stream, 1000).await;
        assert_eq!(received, (0..1000).collect::<Vec<_>>(), "{address}");
        assert_eq!(disposed_count.load(Ordering::SeqCst), 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_sustained_throughput_single_producer() -> Result<()> {
    // ---
    const COUNT: u32 = 20_000;

    for address in addresses("throughput") {
        let registry = EndpointRegistry::new();
        let channel = burst_multicast::<u32>(&registry, &address, COUNT as usize)?;
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let _subscription = channel
            .subscribe_next(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .await?;

        let started = std::time::Instant::now();
        for value in 0..COUNT {
            channel.push(&value).await?;
        }

        let all_arrived = eventually(|| {
            let received = received.clone();
            async move { received.load(Ordering::Relaxed) == COUNT as usize }
        })
        .await;
        assert!(all_arrived, "{address}: {} of {COUNT}", received.load(Ordering::Relaxed));

        let elapsed = started.elapsed();
        println!(
            "{address}: {COUNT} messages in {elapsed:?} ({:.0} msg/s)",
            COUNT as f64 / elapsed.as_secs_f64()
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Unencodable {
    by_pair: HashMap<(u8, u8), u8>,
}

#[tokio::test]
async fn test_unencodable_value_fails_push_and_channel_survives() -> Result<()> {
    // ---
    for address in addresses("unencodable") {
        let registry = EndpointRegistry::new();
        let channel = multicast::<Unencodable>(&registry, &address)?;
        let (_subscription, mut stream) = channel.subscribe_stream().await?;

        let bad = Unencodable {
            by_pair: HashMap::from([((1, 2), 3)]),
        };
        let err = channel.push(&bad).await.expect_err("tuple keys cannot be JSON");
        assert!(matches!(err, ChannelError::Serialization(_)));
        assert!(err.to_string().contains("serialization"));

        let good = Unencodable {
            by_pair: HashMap::new(),
        };
        channel.push(&good).await?;
        assert_eq!(next(&mut stream).await, Notification::Next(good), "{address}");
    }
    Ok(())
}

#[tokio::test]
async fn test_two_types_on_one_address_never_cross() -> Result<()> {
    // ---
    for address in addresses("two-types") {
        // Arrange
        let registry = EndpointRegistry::new();
        let alpha = multicast::<Alpha>(&registry, &address)?;
        let beta = multicast::<Beta>(&registry, &address)?;
        let (_a, mut alpha_stream) = alpha.subscribe_stream().await?;
        let (_b, mut beta_stream) = beta.subscribe_stream().await?;

        // Act
        for id in 0..10 {
            alpha.push(&Alpha { id }).await?;
            beta.push(&Beta {
                name: format!("b{id}"),
            })
            .await?;
        }

        // Assert
        let alphas = next_values(&mut alpha_stream, 10).await;
        let betas = next_values(&mut beta_stream, 10).await;
        assert_eq!(alphas, (0..10).map(|id| Alpha { id }).collect::<Vec<_>>());
        assert_eq!(betas[9], Beta { name: "b9".into() });
        assert!(stays_quiet(&mut alpha_stream).await);
        assert!(stays_quiet(&mut beta_stream).await);

        // One producer and one consumer socket serve both channels.
        assert_eq!(registry.endpoint_count(), 2, "{address}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_of_two_types_never_cross() -> Result<()> {
    // ---
    init_logging();

    for address in addresses("two-types-concurrent") {
        // Arrange
        let registry = EndpointRegistry::new();
        let alpha = Arc::new(multicast::<Alpha>(&registry, &address)?);
        let beta = Arc::new(multicast::<Beta>(&registry, &address)?);
        let (_a, mut alpha_stream) = alpha.subscribe_stream().await?;
        let (_b, mut beta_stream) = beta.subscribe_stream().await?;

        // Act
        let mut pushers = Vec::new();
        for worker in 0..2u32 {
            let alpha = alpha.clone();
            pushers.push(tokio::spawn(async move {
                for id in 0..100 {
                    alpha.push(&Alpha { id: worker * 1000 + id }).await?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, ChannelError>(())
            }));
            let beta = beta.clone();
            pushers.push(tokio::spawn(async move {
                for id in 0..100 {
                    beta.push(&Beta {
                        name: format!("w{worker}-{id}"),
                    })
                    .await?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, ChannelError>(())
            }));
        }
        for pusher in pushers {
            pusher.await.expect("pusher task")?;
        }

        // Assert
        let alphas = next_values(&mut alpha_stream, 200).await;
        let betas = next_values(&mut beta_stream, 200).await;
        assert!(stays_quiet(&mut alpha_stream).await, "{address}");
        assert!(stays_quiet(&mut beta_stream).await, "{address}");

        // Each producer's values arrive in its own order.
        for worker in 0..2u32 {
            let ids: Vec<u32> = alphas
                .iter()
                .map(|alpha| alpha.id)
                .filter(|id| id / 1000 == worker)
                .collect();
            assert_eq!(ids, (0..100).map(|id| worker * 1000 + id).collect::<Vec<_>>());

            let prefix = format!("w{worker}-");
            let names: Vec<&str> = betas
                .iter()
                .map(|beta| beta.name.as_str())
                .filter(|name| name.starts_with(&prefix))
                .collect();
            let expected: Vec<String> = (0..100).map(|id| format!("{prefix}{id}")).collect();
            assert_eq!(names, expected);
        }
        assert_eq!(registry.endpoint_count(), 2, "{address}");
    }
    Ok(())
}

#[tokio::test]
async fn test_panicking_observer_does_not_stop_fanout() -> Result<()> {
    // ---
    for address in addresses("panic") {
        let registry = EndpointRegistry::new();
        let channel = multicast::<u32>(&registry, &address)?;
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        channel
            .subscribe(
                Observer::new(|value: u32| {
                    if value == 1 {
                        panic!("observer blew up");
                    }
                })
                .on_error(move |err| seen.lock().push(err)),
            )
            .await?;
        let (_healthy, mut stream) = channel.subscribe_stream().await?;

        channel.push(&1).await?;
        channel.push(&2).await?;

        assert_eq!(next_values(&mut stream, 2).await, vec![1, 2], "{address}");
        assert_eq!(
            *errors.lock(),
            vec![ChannelError::Observer("observer blew up".into())]
        );
        assert_eq!(channel.state(), ChannelState::Active);
    }
    Ok(())
}

#[tokio::test]
async fn test_diagnostics_sink_sees_lifecycle() -> Result<()> {
    // ---
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    let channel = ChannelBuilder::new()
        .address("inproc://diagnostics")
        .registry(EndpointRegistry::new())
        .diagnostics(move |line| sink.lock().push(line.to_string()))
        .multicast::<u32>()?;

    let _subscription = channel.subscribe_next(|_| {}).await?;
    channel.dispose();

    let lines = lines.lock();
    assert!(lines
        .iter()
        .any(|line| line.contains("producer endpoint ready (application/json)")));
    assert!(lines.iter().any(|line| line.contains("route registered")));
    assert!(lines.iter().any(|line| line.contains("disposed")));
    Ok(())
}

#[tokio::test]
async fn test_observer_may_dispose_from_inside_a_callback() -> Result<()> {
    // ---
    let registry = EndpointRegistry::new();
    let channel = multicast::<u32>(&registry, "inproc://self-dispose")?;
    let slot: Arc<Mutex<Option<mom_multicast::Subscription>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));

    let (own_slot, counter) = (slot.clone(), calls.clone());
    let subscription = channel
        .subscribe_next(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = own_slot.lock().as_ref() {
                subscription.dispose();
            }
        })
        .await?;
    *slot.lock() = Some(subscription);
    let (_watcher, mut stream) = channel.subscribe_stream().await?;

    channel.push(&1).await?;
    channel.push(&2).await?;

    assert_eq!(next_values(&mut stream, 2).await, vec![1, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}
