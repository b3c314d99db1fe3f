mod common;

use std::{sync::atomic::Ordering, time::Duration};

use pandora_bridge::{
    backend::Status,
    config::{Config, Options},
    error::ErrorKind,
    host::{Host, Navigation, QueueItem, ToastLevel},
    queue::Origin,
    session::TransportState,
};

use common::{config, options, settle, FakeSource, Fixture};

const JAZZ: &str = "/pandora/station_id=0";

fn with_options(options: &Options) -> Config {
    Config::from_options(options).value
}

/// Options under which the liveness check never fires during a test.
fn quiet_options(max_station_tracks: u64) -> Options {
    Options {
        liveness_interval: Some(Duration::from_secs(60 * 60)),
        ..options(max_station_tracks)
    }
}

async fn started(config: Config, source: FakeSource) -> Fixture {
    let fx = Fixture::new(config, source);
    fx.player.start().await.unwrap();
    fx
}

fn toasts_containing(fx: &Fixture, needle: &str) -> Vec<ToastLevel> {
    fx.host
        .toasts()
        .into_iter()
        .filter(|(_, message)| message.contains(needle))
        .map(|(level, _)| level)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn selecting_a_station_queues_its_maximum() {
    let fx = started(config(16), FakeSource::new(20)).await;
    assert_eq!(fx.player.transport().await, TransportState::Stopped);

    let Navigation::Tracks(tracks) = fx.player.browse(JAZZ).await.unwrap() else {
        panic!("expected tracks");
    };

    assert_eq!(tracks.len(), 16);
    assert_eq!(fx.host.queue().len(), 16);
    assert_eq!(fx.host.position(), 0);
    assert_eq!(fx.source.fetches(), 1);
    assert_eq!(fx.player.transport().await, TransportState::Playing);
    assert_eq!(fx.player.current_station().await.unwrap().name, "Jazz Radio");

    assert_eq!(
        fx.backend.commands(),
        [
            "clear",
            "addid http://10.0.0.1/0/0.mp3",
            "addtagid 0 artist Artist 0",
            "addtagid 0 album Album 0",
            "addtagid 0 title Title 0",
            "play",
        ]
    );

    let state = fx.host.pushed_states().pop().unwrap();
    assert_eq!(state.status, Status::Play);
    assert_eq!(state.title, "Title 0");
    assert_eq!(state.uri, "http://10.0.0.1/0/0.mp3");
}

#[tokio::test(start_paused = true)]
async fn browsing_the_root_lists_stations() {
    let fx = started(config(16), FakeSource::new(20)).await;

    let Navigation::Stations(items) = fx.player.browse("/pandora").await.unwrap() else {
        panic!("expected stations");
    };
    let listed: Vec<(&str, &str)> = items
        .iter()
        .map(|item| (item.title.as_str(), item.uri.as_str()))
        .collect();
    assert_eq!(
        listed,
        [
            ("Jazz Radio", "/pandora/station_id=0"),
            ("Funk Radio", "/pandora/station_id=1"),
        ]
    );

    let error = fx.player.browse("/spotify/playlists").await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidArgument);

    let error = fx.player.browse("/pandora/station_id=7").await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::NotFound);
    assert!(fx.host.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_station_is_reported() {
    let fx = started(config(16), FakeSource::new(0)).await;

    let error = fx.player.browse(JAZZ).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unavailable);
    assert_eq!(
        toasts_containing(&fx, "Failed to load tracks from Jazz Radio"),
        [ToastLevel::Error]
    );
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn next_rates_down_and_removes_the_current_track() {
    let mut options = options(16);
    options.next_is_thumbs_down = true;
    let fx = started(with_options(&options), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    let current = fx.host.queue()[0].uri.clone();

    fx.player.next().await.unwrap();

    assert_eq!(fx.host.queue().len(), 15);
    assert!(!fx.queue_uris().contains(&current));
    assert_eq!(
        *fx.source.feedback.lock().unwrap(),
        [("token-0-0".to_string(), true)]
    );
    assert_eq!(fx.backend.commands().last().unwrap(), "stop");
    assert_eq!(fx.player.transport().await, TransportState::Stopped);

    // Still resolvable from the last fetched batch.
    assert_eq!(fx.player.explode_uri(&current).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn next_without_rating_keeps_the_queue() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();

    fx.player.next().await.unwrap();

    assert_eq!(fx.host.queue().len(), 16);
    assert!(fx.source.feedback.lock().unwrap().is_empty());
    assert_eq!(fx.backend.subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn rapid_second_previous_is_ignored() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    fx.host.set_position(3);

    fx.player.previous().await.unwrap();
    assert_eq!(fx.host.position(), 2);
    assert_eq!(fx.backend.count("addid"), 2);
    assert_eq!(
        fx.backend.commands().iter().filter(|c| c.starts_with("addid")).last().unwrap(),
        "addid http://10.0.0.1/0/2.mp3"
    );

    let commands = fx.backend.commands();
    tokio::time::advance(Duration::from_millis(100)).await;
    fx.player.previous().await.unwrap();

    assert_eq!(fx.host.position(), 2);
    assert_eq!(fx.backend.commands(), commands);
    assert_eq!(fx.player.transport().await, TransportState::Playing);
}

#[tokio::test(start_paused = true)]
async fn lone_previous_replays_when_enabled() {
    let mut options = quiet_options(16);
    options.replay_on_double_back = true;
    let fx = started(with_options(&options), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    fx.host.set_seek(Duration::from_secs(30));

    fx.player.previous().await.unwrap();

    assert_eq!(fx.host.position(), 0);
    assert_eq!(fx.host.seek(), Duration::ZERO);
    let plays: Vec<String> = fx
        .backend
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("addid"))
        .collect();
    assert_eq!(plays, ["addid http://10.0.0.1/0/0.mp3"; 2]);
}

#[tokio::test(start_paused = true)]
async fn previous_under_shuffle_hands_over_to_the_host() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    fx.host.set_random(true);

    fx.player.previous().await.unwrap();

    assert_eq!(fx.host.position(), 0);
    assert_eq!(fx.backend.count("addid"), 1);
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    fx.host.set_seek(Duration::from_millis(42_500));

    fx.player.pause().await.unwrap();
    assert_eq!(fx.player.transport().await, TransportState::Paused);
    assert_eq!(fx.backend.subscribers(), 0);
    let state = fx.host.pushed_states().pop().unwrap();
    assert_eq!(state.status, Status::Pause);
    assert_eq!(state.seek, 42_500);

    fx.player.resume().await.unwrap();
    assert_eq!(fx.player.transport().await, TransportState::Playing);
    assert_eq!(fx.backend.subscribers(), 1);
    assert_eq!(fx.backend.commands().last().unwrap(), "resume");
    assert_eq!(fx.host.pushed_states().pop().unwrap().status, Status::Play);
}

#[tokio::test(start_paused = true)]
async fn resume_without_a_paused_track_is_ignored() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;

    fx.player.resume().await.unwrap();
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
    assert_eq!(fx.backend.count("resume"), 0);
    assert_eq!(fx.backend.subscribers(), 0);

    fx.player.browse(JAZZ).await.unwrap();
    fx.player.resume().await.unwrap();
    assert_eq!(fx.player.transport().await, TransportState::Playing);
    assert_eq!(fx.backend.count("resume"), 0);
    assert_eq!(fx.backend.subscribers(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_without_a_playing_track_is_ignored() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    fx.player.stop().await.unwrap();
    let pushed = fx.host.pushed_states().len();

    fx.player.pause().await.unwrap();
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
    assert_eq!(fx.backend.count("pause"), 0);
    assert_eq!(fx.host.pushed_states().len(), pushed);

    fx.player.resume().await.unwrap();
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
    assert_eq!(fx.backend.count("resume"), 0);
}

#[tokio::test(start_paused = true)]
async fn explode_resolves_queued_tracks() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();

    for item in fx.host.queue().iter().take(3) {
        let tracks = fx.player.explode_uri(&item.uri).await.unwrap();
        let queued = item.track.as_ref().unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].station_id, queued.station_id);
        assert_eq!(tracks[0].artist, queued.artist);
        assert_eq!(tracks[0].album, queued.album);
        assert_eq!(tracks[0].title, queued.title);
    }

    let unknown = fx
        .player
        .explode_uri("/pandora/station_id=0/track_id=999")
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

#[tokio::test(start_paused = true)]
async fn explode_rejects_non_track_uris() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    let queue = fx.host.queue();

    let error = fx.player.explode_uri(JAZZ).await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::InvalidArgument);
    assert_eq!(
        toasts_containing(&fx, "could not resolve uri"),
        [ToastLevel::Error]
    );
    assert_eq!(fx.host.queue(), queue);
}

#[tokio::test(start_paused = true)]
async fn start_without_credentials_fails() {
    let fx = Fixture::new(Config::default(), FakeSource::new(20));

    let error = fx.player.start().await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::Unauthenticated);
    assert_eq!(
        toasts_containing(&fx, "Need email address and password"),
        [ToastLevel::Error]
    );
    assert_eq!(fx.source.logins.load(Ordering::SeqCst), 0);
    assert_eq!(fx.host.browse_sources().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_maximum_warns_once_and_falls_back() {
    let fx = started(config(16), FakeSource::new(30)).await;

    let mut options = options(16);
    options.max_station_tracks = Some(serde_json::json!("3"));
    fx.player.save_settings(&options).await.unwrap();

    assert_eq!(
        toasts_containing(&fx, "Invalid Song Maximum!").len(),
        1
    );
    assert!(toasts_containing(&fx, "Plugin Options Saved").is_empty());
    assert_eq!(fx.source.logins.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        toasts_containing(&fx, "Plugin Options Saved"),
        [ToastLevel::Success]
    );

    fx.player.browse(JAZZ).await.unwrap();
    assert_eq!(fx.host.queue().len(), Config::MAX_STATION_TRACKS_DEFAULT);
}

#[tokio::test(start_paused = true)]
async fn saving_credentials_sets_up_the_session() {
    let fx = Fixture::new(Config::default(), FakeSource::new(20));

    let error = fx.player.save_settings(&Options::default()).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unauthenticated);
    assert!(toasts_containing(&fx, "Need email address").is_empty());
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(toasts_containing(&fx, "Need email address").len(), 1);

    fx.player.save_settings(&options(16)).await.unwrap();
    assert_eq!(fx.source.logins.load(Ordering::SeqCst), 1);

    // Changed credentials log in again.
    let mut options = options(16);
    options.password = Some("correct horse".to_string());
    fx.player.save_settings(&options).await.unwrap();
    assert_eq!(fx.source.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_logins_point_at_the_settings() {
    let source = FakeSource::new(20);
    source.reject_logins.store(true, Ordering::SeqCst);
    let fx = Fixture::new(config(16), source);

    let error = fx.player.start().await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::Unauthenticated);
    assert_eq!(
        toasts_containing(&fx, "Check email address and password"),
        [ToastLevel::Error]
    );
    assert!(toasts_containing(&fx, "Could not log in").is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_reauthentication_backs_off_and_keeps_playing() {
    let source = FakeSource::new(20).with_token_ttl(Duration::from_secs(120));
    let fx = started(with_options(&quiet_options(16)), source).await;
    fx.player.browse(JAZZ).await.unwrap();
    assert_eq!(fx.source.logins(), 1);
    fx.source.failing_logins.store(1, Ordering::SeqCst);

    // The token is renewed a minute ahead of its expiry.
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(fx.source.login_attempts.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fx.source.login_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(fx.source.logins(), 1);
    assert_eq!(fx.player.transport().await, TransportState::Playing);
    assert_eq!(fx.backend.count("stop"), 0);

    // At least thirty seconds of back-off, with at most a quarter of jitter.
    tokio::time::sleep(Duration::from_secs(28)).await;
    assert_eq!(fx.source.logins(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fx.source.logins(), 2);
    assert_eq!(fx.player.transport().await, TransportState::Playing);
    assert!(toasts_containing(&fx, "log in").is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_sessions_log_in_again_before_fetching() {
    let source = FakeSource::new(20).with_token_ttl(Duration::ZERO);
    let fx = started(with_options(&quiet_options(16)), source).await;
    assert_eq!(fx.source.logins(), 1);

    fx.player.browse(JAZZ).await.unwrap();

    assert_eq!(fx.source.logins(), 2);
    assert_eq!(fx.host.queue().len(), 16);
}

#[tokio::test(start_paused = true)]
async fn finished_tracks_keep_listening_only_for_our_items() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    settle().await;
    assert_eq!(fx.backend.subscribers(), 1);

    fx.backend.finish();
    settle().await;
    assert_eq!(fx.backend.subscribers(), 1);
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
    assert_eq!(fx.host.pushed_states().pop().unwrap().status, Status::Stop);

    fx.host
        .add_queue_items(vec![QueueItem::foreign("webradio", "http://radio.example.com")]);
    fx.host.set_position(16);
    fx.backend.finish();
    settle().await;
    assert_eq!(fx.backend.subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_playback_skips() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.backend.fail_enqueue.store(true, Ordering::SeqCst);

    fx.player.browse(JAZZ).await.unwrap();

    assert_eq!(fx.backend.commands(), ["clear", "stop"]);
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
    assert_eq!(
        toasts_containing(&fx, "Could not play Title 0"),
        [ToastLevel::Error]
    );
}

#[tokio::test(start_paused = true)]
async fn old_tracks_are_removed_one_by_one() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();
    let uris = fx.queue_uris();

    // The host advanced to the fifth track.
    fx.host.set_position(4);
    let track = fx.host.queue()[4].track.clone().unwrap();
    fx.player
        .clear_and_play(track, Origin::ContinuousPlayback)
        .await
        .unwrap();

    // The previous track went right away, five more were fetched.
    assert_eq!(fx.host.queue().len(), 20);
    assert!(!fx.queue_uris().contains(&uris[0]));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(fx.host.queue().len(), 19);
    assert!(!fx.queue_uris().contains(&uris[1]));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fx.host.queue().len(), 17);
    for uri in &uris[1..4] {
        assert!(!fx.queue_uris().contains(uri));
    }
    assert_eq!(fx.queue_uris()[fx.host.position()], uris[4]);
}

#[tokio::test(start_paused = true)]
async fn removals_schedule_at_most_the_played_tracks() {
    let fx = started(with_options(&quiet_options(16)), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();

    assert_eq!(fx.player.remove_old_track_block(2, 5).await, 2);
    assert_eq!(fx.player.remove_old_track_block(0, 5).await, 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_streams_are_skipped() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.player.browse(JAZZ).await.unwrap();

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(fx.player.transport().await, TransportState::Playing);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
    assert_eq!(fx.backend.commands().last().unwrap(), "stop");
}

#[tokio::test(start_paused = true)]
async fn stale_tracks_are_reaped() {
    let fx = started(
        with_options(&quiet_options(16)),
        FakeSource::new(20).with_age(Duration::from_secs(60 * 60)),
    )
    .await;
    fx.player.browse(JAZZ).await.unwrap();
    let current = fx.queue_uris()[0].clone();

    tokio::time::sleep(Config::REAPER_INTERVAL + Duration::from_secs(1)).await;

    assert_eq!(fx.queue_uris(), [current]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_our_items_only() {
    let fx = started(config(16), FakeSource::new(20)).await;
    fx.host
        .add_queue_items(vec![QueueItem::foreign("webradio", "http://radio.example.com")]);
    fx.player.browse(JAZZ).await.unwrap();
    assert_eq!(fx.host.queue().len(), 17);

    fx.player.shutdown().await.unwrap();

    assert_eq!(fx.queue_uris(), ["http://radio.example.com"]);
    assert!(fx.host.browse_sources().is_empty());
    assert_eq!(fx.backend.commands().last().unwrap(), "stop");
    assert_eq!(fx.player.transport().await, TransportState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn changing_station_flushes_when_configured() {
    let mut options = quiet_options(16);
    options.flush_on_station_change = true;
    let fx = started(with_options(&options), FakeSource::new(20)).await;
    fx.host
        .add_queue_items(vec![QueueItem::foreign("webradio", "http://radio.example.com")]);

    fx.player.browse(JAZZ).await.unwrap();
    fx.player.browse("/pandora/station_id=1").await.unwrap();

    let queue = fx.host.queue();
    assert_eq!(queue.len(), 17);
    assert!(queue.iter().filter(|item| item.is_ours()).all(|item| item.is_on_station(1)));
    assert_eq!(fx.player.current_station().await.unwrap().name, "Funk Radio");
}
