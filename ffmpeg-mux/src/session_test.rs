use std::path::Path;

use ffmpeg_next::media;

use super::*;
use crate::{
    error::ErrorClass,
    reframer::AudioReframer,
    metadata::{StreamPackets, probe, scan_packets},
    settings::{SessionSettings, VideoPtsPolicy},
};

const TICKS: usize = 50;

/// 44100 Hz mono at 25 fps.
const PCM_PER_TICK: usize = 1764 * 2;

fn picture(settings: &SessionSettings, tick: usize) -> RawPicture {
    let (width, height) = (settings.video.width, settings.video.height);
    let mut picture = RawPicture::new(width, height);
    let stride = picture.stride();
    let data = picture.data_mut();
    for y in 0..height as usize {
        for x in 0..width as usize {
            let px = y * stride + x * 3;
            data[px] = (x + tick * 3) as u8;
            data[px + 1] = (y + tick) as u8;
            data[px + 2] = (x + y) as u8;
        }
    }
    picture
}

fn tone(tick: usize, len: usize) -> Vec<u8> {
    let start = tick * len / 2;
    (0..len / 2)
        .flat_map(|i| {
            let t = (start + i) as f64 / 44100.0;
            let s = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
            s.to_le_bytes()
        })
        .collect()
}

fn path_in(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

fn run(session: &mut EncoderSession, ticks: usize) -> anyhow::Result<Vec<TickReport>> {
    let settings = session.settings().clone();
    let mut reports = Vec::with_capacity(ticks);
    for tick in 0..ticks {
        reports.push(session.add_frame(&picture(&settings, tick), &tone(tick, PCM_PER_TICK))?);
    }
    Ok(reports)
}

fn stream_of(streams: &[StreamPackets], medium: media::Type) -> &StreamPackets {
    streams
        .iter()
        .find(|s| s.medium == medium)
        .expect("stream present in output")
}

#[test]
fn test_encode_reference_mp4() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "reference.mp4");

    let mut session = EncoderSession::new(SessionSettings::default());
    session.init_file(&path, "auto")?;
    assert_eq!(session.state(), SessionState::Opened);
    assert_eq!(session.audio_frame_bytes(), Some(2048));
    assert!(session.video_stream().is_some_and(|s| s.is_video()));
    assert!(session.audio_stream().is_some_and(|s| s.is_audio()));

    let reports = run(&mut session, TICKS)?;
    let framed: usize = reports.iter().map(|r| r.audio_frames).sum();
    // 50 * 3528 bytes = 86 whole 2048-byte frames and a 272-byte tail
    assert_eq!(framed, 86);
    assert_eq!(session.pending_audio(), 272);

    session.finish()?;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.open_resources(), 0);

    let stats = session.stats().clone();
    assert_eq!(stats.ticks, TICKS as u64);
    assert_eq!(stats.video_packets, TICKS as u64);
    assert_eq!(stats.audio_frames, 87);
    assert!(stats.audio_packets > 0);
    assert_eq!(stats.skipped_pictures, 0);

    let streams = scan_packets(&path)?;
    assert_eq!(streams.len(), 2);
    let video = stream_of(&streams, media::Type::Video);
    let audio = stream_of(&streams, media::Type::Audio);
    assert_eq!(video.count, TICKS);
    assert_eq!(audio.count as u64, stats.audio_packets);
    assert!(video.key_frames >= TICKS / 12);
    assert!(video.dts_monotonic());
    assert!(audio.dts_monotonic());

    let info = probe(&path)?;
    let v = info.video().expect("video stream");
    assert_eq!((v.width, v.height), (Some(320), Some(240)));
    let a = info.audio().expect("audio stream");
    assert_eq!((a.sample_rate, a.channels), (Some(44100), Some(1)));
    Ok(())
}

#[test]
fn test_raw_video_in_avi() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "raw.avi");

    let mut settings = SessionSettings::default();
    settings.video.codec = Some("rawvideo".to_string());
    settings.audio.codec = Some("pcm_s16le".to_string());
    let mut session = EncoderSession::new(settings);
    session.init_file(&path, "auto")?;
    assert_eq!(session.audio_frame_bytes(), Some(524_288));

    let reports = run(&mut session, TICKS)?;
    assert!(reports.iter().all(|r| r.video_packets == 1));
    assert!(reports.iter().all(|r| r.audio_frames == 0));
    assert_eq!(session.pending_audio(), TICKS * PCM_PER_TICK);
    session.finish()?;

    let stats = session.stats();
    assert_eq!(stats.video_packets, TICKS as u64);
    assert_eq!(stats.video_bytes, (TICKS * 320 * 240 * 3 / 2) as u64);
    assert_eq!(stats.audio_frames, 1);

    let streams = scan_packets(&path)?;
    let video = stream_of(&streams, media::Type::Video);
    assert_eq!(video.count, TICKS);
    assert_eq!(video.key_frames, TICKS);
    assert_eq!(
        stream_of(&streams, media::Type::Audio).count as u64,
        stats.audio_packets
    );
    Ok(())
}

#[test]
fn test_missing_picture_skips_video_only() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "gaps.mkv");

    let mut session = EncoderSession::new(SessionSettings::default());
    session.init_file(&path, "auto")?;
    let settings = session.settings().clone();
    for tick in 0..10 {
        let frame = if tick % 2 == 0 {
            picture(&settings, tick)
        } else {
            RawPicture::empty()
        };
        let report = session.add_frame(&frame, &tone(tick, PCM_PER_TICK))?;
        if tick % 2 == 1 {
            assert_eq!(report.video_packets, 0);
        }
    }
    session.finish()?;

    let stats = session.stats();
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.skipped_pictures, 5);
    assert_eq!(stats.video_packets, 5);
    assert!(stats.audio_frames > 0);
    assert_eq!(stream_of(&scan_packets(&path)?, media::Type::Video).count, 5);
    Ok(())
}

#[test]
fn test_init_failure_leaves_nothing_open() -> anyhow::Result<()> {
    crate::init()?;
    let mut session = EncoderSession::new(SessionSettings::default());
    let err = session
        .init_file("/nonexistent-dir/sub/out.mp4", "auto")
        .err()
        .expect("directory does not exist");
    assert_eq!(err.class(), ErrorClass::Init);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.open_resources(), 0);

    let err = session
        .add_frame(&RawPicture::empty(), &[])
        .err()
        .expect("not opened");
    assert!(matches!(err, MuxError::InvalidState { op: "add_frame", .. }));

    session.finish()?;
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[test]
fn test_unknown_container() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let mut session = EncoderSession::new(SessionSettings::default());
    let err = session
        .init_file(&path_in(&dir, "out.mp4"), "no-such-muxer")
        .err()
        .expect("unknown container");
    assert!(matches!(err, MuxError::FormatNotFound { .. }));
    assert!(!Path::new(&path_in(&dir, "out.mp4")).exists());
    Ok(())
}

#[test]
fn test_invalid_settings_rejected() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let mut settings = SessionSettings::default();
    settings.video.width = 321;
    let mut session = EncoderSession::new(settings);
    let err = session
        .init_file(&path_in(&dir, "odd.mkv"), "auto")
        .err()
        .expect("odd width");
    assert!(matches!(err, MuxError::InvalidSettings { .. }));
    assert_eq!(session.open_resources(), 0);
    Ok(())
}

#[test]
fn test_finish_is_idempotent() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "twice.mkv");

    let mut session = EncoderSession::new(SessionSettings::default());
    session.init_file(&path, "auto")?;
    run(&mut session, 5)?;
    session.finish()?;
    let stats = session.stats().clone();
    session.finish()?;
    assert_eq!(session.stats(), &stats);
    assert_eq!(session.state(), SessionState::Closed);

    assert!(matches!(
        session.init_file(&path, "auto"),
        Err(MuxError::InvalidState { op: "init_file", .. })
    ));
    assert!(matches!(
        session.add_frame(&RawPicture::empty(), &[]),
        Err(MuxError::InvalidState { .. })
    ));
    Ok(())
}

#[test]
fn test_drop_finishes_file() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "dropped.mkv");
    {
        let mut session = EncoderSession::new(SessionSettings::default());
        session.init_file(&path, "auto")?;
        run(&mut session, 10)?;
    }
    let streams = scan_packets(&path)?;
    assert_eq!(stream_of(&streams, media::Type::Video).count, 10);
    Ok(())
}

#[test]
fn test_init_twice_rejected() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let mut session = EncoderSession::new(SessionSettings::default());
    session.init_file(&path_in(&dir, "a.mkv"), "auto")?;
    let err = session
        .init_file(&path_in(&dir, "b.mkv"), "auto")
        .err()
        .expect("already open");
    assert_eq!(err.class(), ErrorClass::State);
    assert_eq!(session.state(), SessionState::Opened);
    Ok(())
}

#[test]
fn test_carry_over_overflow_is_reported() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let mut settings = SessionSettings::default();
    settings.audio.codec = Some("aac".to_string());
    settings.carry_over_capacity = 4096;
    let mut session = EncoderSession::new(settings);
    session.init_file(&path_in(&dir, "overflow.mkv"), "auto")?;
    let settings = session.settings().clone();

    let err = session
        .add_frame(&picture(&settings, 0), &tone(0, 8192))
        .err()
        .expect("chunk larger than carry-over");
    assert!(matches!(
        err,
        MuxError::BufferOverflow {
            pending: 0,
            incoming: 8192,
            capacity: 4096
        }
    ));
    assert_eq!(err.class(), ErrorClass::Overflow);
    assert_eq!(session.pending_audio(), 0);

    // still usable with smaller chunks
    let report = session.add_frame(&picture(&settings, 1), &tone(1, 2048))?;
    assert_eq!(report.audio_frames, 1);
    session.finish()?;
    Ok(())
}

#[test]
fn test_partial_sample_rejected() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let mut session = EncoderSession::new(SessionSettings::default());
    session.init_file(&path_in(&dir, "odd-pcm.mkv"), "auto")?;
    let err = session
        .add_frame(&RawPicture::empty(), &[0u8; 3])
        .err()
        .expect("odd byte count");
    assert!(matches!(
        err,
        MuxError::InvalidInput {
            kind: StreamKind::Audio,
            ..
        }
    ));
    assert!(err.is_recoverable());
    assert_eq!(session.state(), SessionState::Opened);
    assert_eq!(session.pending_audio(), 0);

    let settings = session.settings().clone();
    let report = session.add_frame(&picture(&settings, 1), &tone(1, PCM_PER_TICK))?;
    assert!(report.audio_frames > 0 || session.pending_audio() == PCM_PER_TICK);
    session.finish()?;
    Ok(())
}

#[test]
fn test_wrong_picture_size_rejected() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let mut session = EncoderSession::new(SessionSettings::default());
    session.init_file(&path_in(&dir, "size.mkv"), "auto")?;
    let err = session
        .add_frame(&RawPicture::new(64, 48), &[])
        .err()
        .expect("wrong size");
    assert!(matches!(
        err,
        MuxError::InvalidInput {
            kind: StreamKind::Video,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_audio_failure_tolerated_unless_required() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;

    let mut settings = SessionSettings::default();
    settings.audio.codec = Some("no-such-audio-codec".to_string());
    let mut session = EncoderSession::new(settings.clone());
    let path = path_in(&dir, "silent.mkv");
    session.init_file(&path, "auto")?;
    assert!(session.audio_stream().is_none());
    assert_eq!(session.audio_frame_bytes(), None);
    let report = session.add_frame(&picture(&settings, 0), &tone(0, PCM_PER_TICK))?;
    assert_eq!(report.audio_frames, 0);
    session.finish()?;
    assert_eq!(probe(&path)?.streams.len(), 1);

    settings.audio.required = true;
    let mut session = EncoderSession::new(settings);
    let err = session
        .init_file(&path_in(&dir, "required.mkv"), "auto")
        .err()
        .expect("audio is required");
    assert!(matches!(
        err,
        MuxError::EncoderNotFound {
            kind: StreamKind::Audio,
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.open_resources(), 0);
    Ok(())
}

#[test]
fn test_legacy_pts_policy_still_muxes() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "legacy.avi");
    let mut settings = SessionSettings::default();
    settings.video.codec = Some("mpeg4".to_string());
    settings.video.pts_policy = VideoPtsPolicy::ClearValid;
    let mut session = EncoderSession::new(settings);
    session.init_file(&path, "auto")?;
    run(&mut session, 20)?;
    session.finish()?;
    assert_eq!(stream_of(&scan_packets(&path)?, media::Type::Video).count, 20);
    Ok(())
}

#[test]
fn test_oversized_audio_frame_leaves_video_only_header() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let path = path_in(&dir, "small-carry-over.mkv");
    let mut settings = SessionSettings::default();
    settings.audio.codec = Some("pcm_s16le".to_string());
    settings.carry_over_capacity = 4096;
    let mut session = EncoderSession::new(settings.clone());
    session.init_file(&path, "auto")?;
    assert!(session.audio_stream().is_none());
    session.add_frame(&picture(&settings, 0), &tone(0, PCM_PER_TICK))?;
    session.finish()?;

    let info = probe(&path)?;
    assert_eq!(info.streams.len(), 1);
    assert!(info.streams[0].is_video());
    Ok(())
}

#[test]
fn test_file_less_container() -> anyhow::Result<()> {
    crate::init()?;
    let mut settings = SessionSettings::default();
    settings.video.codec = Some("rawvideo".to_string());
    settings.audio.codec = Some("pcm_s16le".to_string());
    let mut session = EncoderSession::new(settings);
    // the null muxer never opens the path
    session.init_file("/nonexistent-dir/sub/out.null", "null")?;
    run(&mut session, 5)?;
    session.finish()?;
    assert_eq!(session.stats().video_packets, 5);
    assert!(!Path::new("/nonexistent-dir/sub/out.null").exists());
    Ok(())
}

fn frame_stream(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

#[test]
fn test_encode_failure_skips_one_frame() -> anyhow::Result<()> {
    let data = frame_stream(22);
    let mut reframer = AudioReframer::new(4, 64)?;
    let mut seen = Vec::new();
    let fed = {
        let mut drain = reframer.push(&data)?;
        feed_frames(&mut drain, |frame| {
            seen.push(frame.to_vec());
            match seen.len() {
                2 | 4 => Err(MuxError::Encode {
                    kind: StreamKind::Audio,
                    source: ffmpeg_next::Error::InvalidData,
                }),
                _ => Ok(1),
            }
        })
    };
    assert_eq!(fed.frames, 5);
    assert_eq!(fed.packets, 3);
    assert_eq!(seen.concat(), &data[..20]);
    assert!(matches!(fed.failure, Some(MuxError::Encode { .. })));
    assert_eq!(reframer.pending_bytes(), &data[20..]);

    let mut drain = reframer.push(&[100, 101])?;
    assert_eq!(drain.next_frame(), Some(&[20, 21, 100, 101][..]));
    Ok(())
}

#[test]
fn test_write_failure_stops_drain() -> anyhow::Result<()> {
    let data = frame_stream(22);
    let mut reframer = AudioReframer::new(4, 64)?;
    let mut calls = 0;
    let fed = {
        let mut drain = reframer.push(&data)?;
        feed_frames(&mut drain, |_| {
            calls += 1;
            match calls {
                1 => Err(MuxError::Encode {
                    kind: StreamKind::Audio,
                    source: ffmpeg_next::Error::InvalidData,
                }),
                2 => Err(MuxError::Write {
                    kind: StreamKind::Audio,
                    source: ffmpeg_next::Error::Eof,
                }),
                _ => Ok(1),
            }
        })
    };
    assert_eq!(calls, 2);
    assert_eq!(fed.frames, 2);
    assert_eq!(fed.packets, 0);
    // first failure wins
    assert!(matches!(fed.failure, Some(MuxError::Encode { .. })));
    // unread frames stay queued, compacted to the front
    assert_eq!(reframer.pending(), 14);
    assert_eq!(reframer.pending_bytes(), &data[8..]);

    let mut drain = reframer.push(&[])?;
    let fed = feed_frames(&mut drain, |_| Ok(1));
    assert_eq!((fed.frames, fed.packets), (3, 3));
    assert!(fed.failure.is_none());
    drop(drain);
    assert_eq!(reframer.pending_bytes(), &data[20..]);
    Ok(())
}
