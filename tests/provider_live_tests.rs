mod helpers;

use std::time::Duration;

use candle_window::{
    CandleWindowProvider, FetchError, ProviderConfig, ProviderError, ProviderEvent,
    ReadinessPolicy,
};
use tokio::sync::broadcast;

use helpers::{assert_ascending, candles, ManualClock, ScriptedSource, DAY, MINUTE, NOW};

fn config(policy: ReadinessPolicy) -> ProviderConfig {
    let mut cfg = ProviderConfig::new("ETHUSDT", "1m");
    cfg.window_days = 1;
    cfg.readiness_policy = policy;
    cfg
}

async fn next_update(events: &mut broadcast::Receiver<ProviderEvent>) -> (usize, usize) {
    loop {
        if let ProviderEvent::Updated { appended, evicted } = events.recv().await.unwrap() {
            return (appended, evicted);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn live_ticks_append_then_evict() {
    let since = NOW - DAY;
    let clock = ManualClock::at(NOW);
    let source = ScriptedSource::with_pages(vec![
        Ok(candles(since, 5, MINUTE)),
        Ok(candles(since + 5 * MINUTE, 2, MINUTE)),
    ]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        clock.clone(),
    )
    .unwrap();
    let mut events = provider.subscribe();

    provider.wait_until_ready().await.unwrap();
    assert_eq!(provider.len(), 5);

    assert_eq!(next_update(&mut events).await, (2, 0));
    assert_eq!(source.calls()[1].since_ms, since + 5 * MINUTE);
    assert_eq!(provider.len(), 7);
    assert_eq!(provider.last().unwrap().open_time, since + 6 * MINUTE);
    assert_ascending(&provider.snapshot());

    // Two minutes later the two oldest candles leave the window.
    clock.advance(2 * MINUTE);
    assert_eq!(next_update(&mut events).await, (0, 2));
    assert_eq!(source.calls()[2].since_ms, since + 7 * MINUTE);
    assert_eq!(provider.len(), 5);
    assert_eq!(provider.first().unwrap().open_time, since + 2 * MINUTE);
}

#[tokio::test(start_paused = true)]
async fn empty_live_ticks_leave_the_buffer_unchanged() {
    let since = NOW - DAY;
    let source = ScriptedSource::with_pages(vec![Ok(candles(since, 5, MINUTE))]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();

    provider.wait_until_ready().await.unwrap();
    let before = provider.snapshot();

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(source.call_count(), 4);
    assert_eq!(provider.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn read_accessors_agree_with_iteration() {
    let since = NOW - DAY;
    let source = ScriptedSource::with_pages(vec![Ok(candles(since, 5, MINUTE))]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source,
        ManualClock::at(NOW),
    )
    .unwrap();
    provider.wait_until_ready().await.unwrap();

    assert_eq!(
        provider.get(5),
        Err(ProviderError::IndexOutOfRange { position: 5, len: 5 })
    );
    let iterated: Vec<_> = {
        let view = provider.view();
        assert_eq!(view.len(), 5);
        view.iter().cloned().collect()
    };
    for (position, candle) in iterated.iter().enumerate() {
        assert_eq!(&provider.get(position).unwrap(), candle);
    }
    assert_eq!(iterated.first(), Some(&provider.first().unwrap()));
    assert_eq!(iterated.last(), Some(&provider.last().unwrap()));
    assert_eq!(provider.snapshot(), provider.snapshot());
}

#[tokio::test(start_paused = true)]
async fn fail_open_stays_ready_through_tick_failures() {
    let since = NOW - DAY;
    let source = ScriptedSource::with_pages(vec![
        Ok(candles(since, 5, MINUTE)),
        Err(FetchError::Api {
            code: -1003,
            msg: "Too much request weight used".to_string(),
        }),
    ]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();
    let mut events = provider.subscribe();

    loop {
        if let ProviderEvent::LiveTickFailed { error } = events.recv().await.unwrap() {
            assert!(error.contains("-1003"));
            break;
        }
    }
    assert!(provider.is_data_available());
    assert_eq!(provider.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn fail_closed_clears_and_restores_readiness() {
    let since = NOW - DAY;
    let source = ScriptedSource::with_pages(vec![
        Ok(candles(since, 5, MINUTE)),
        Err(FetchError::Unavailable("connection reset".to_string())),
        Ok(candles(since + 5 * MINUTE, 1, MINUTE)),
    ]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailClosed),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();
    let mut events = provider.subscribe();

    assert!(matches!(
        events.recv().await.unwrap(),
        ProviderEvent::BackfillFinished(_)
    ));
    assert_eq!(events.recv().await.unwrap(), ProviderEvent::Ready);
    assert!(matches!(
        events.recv().await.unwrap(),
        ProviderEvent::LiveTickFailed { .. }
    ));
    assert_eq!(events.recv().await.unwrap(), ProviderEvent::ReadinessLost);
    assert!(!provider.is_data_available());
    assert_eq!(provider.len(), 5);

    assert_eq!(events.recv().await.unwrap(), ProviderEvent::Ready);
    assert_eq!(
        events.recv().await.unwrap(),
        ProviderEvent::Updated {
            appended: 1,
            evicted: 0
        }
    );
    assert!(provider.is_data_available());
    assert_eq!(provider.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_live_updates() {
    let since = NOW - DAY;
    let source = ScriptedSource::with_pages(vec![Ok(candles(since, 5, MINUTE))]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();
    provider.wait_until_ready().await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(source.call_count(), 2);

    provider.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_an_in_flight_fetch() {
    let source = ScriptedSource::slow(
        Duration::from_secs(3600),
        vec![Ok(candles(NOW - DAY, 5, MINUTE))],
    );
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.call_count(), 1);
    assert!(provider.is_empty());

    let started = tokio::time::Instant::now();
    provider.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_provider_stops_its_task() {
    let source = ScriptedSource::with_pages(vec![Ok(candles(NOW - DAY, 5, MINUTE))]);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();
    provider.wait_until_ready().await.unwrap();
    drop(provider);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_ticks_never_overlap_or_bunch_up() {
    let since = NOW - DAY;
    let fetch_delay = Duration::from_secs(25);
    let mut pages = vec![Ok(candles(since, 5, MINUTE))];
    pages.extend((5..11).map(|i| Ok(candles(since + i * MINUTE, 1, MINUTE))));
    let source = ScriptedSource::slow(fetch_delay, pages);
    let provider = CandleWindowProvider::with_clock(
        config(ReadinessPolicy::FailOpen),
        source.clone(),
        ManualClock::at(NOW),
    )
    .unwrap();

    provider.wait_until_ready().await.unwrap();
    // Each tick takes 25 s against a 10 s period.
    tokio::time::sleep(Duration::from_secs(120)).await;

    let calls = source.calls();
    assert!(calls.len() >= 4, "expected several live ticks, got {}", calls.len());
    for pair in calls.windows(2) {
        assert!(
            pair[1].at - pair[0].at >= fetch_delay,
            "fetches started {:?} apart",
            pair[1].at - pair[0].at
        );
    }
    // Each live fetch starts right after the previous append.
    for pair in calls[1..].windows(2) {
        assert_eq!(pair[1].since_ms, pair[0].since_ms + MINUTE);
    }
    assert!(provider.len() > 5);
    assert_ascending(&provider.snapshot());
}

