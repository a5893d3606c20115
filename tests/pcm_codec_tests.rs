// Integration tests for the PCM wire codec
//
// These tests follow audio through the same path the session uses: frames
// are encoded into realtime input messages, and service audio is decoded
// from inline data into playback chunks.

use anyhow::Result;

use voice_coach::audio::codec::{decode_base64, decode_chunk, decode_frame, encode_frame};
use voice_coach::audio::{DecodeError, OUTPUT_SAMPLE_RATE};
use voice_coach::realtime::{ClientMessage, ServerEvent, ServerMessage};

const STEP: f32 = 1.0 / 32768.0;

#[test]
fn test_round_trip_across_full_scale() -> Result<()> {
    // Ramp from -1.0 to 1.0 inclusive
    let original: Vec<f32> = (0..=2000).map(|i| i as f32 / 1000.0 - 1.0).collect();

    let chunk = encode_frame(&original);
    assert_eq!(chunk.pcm.len(), original.len() * 2);

    let decoded = decode_frame(&chunk.data)?;
    assert_eq!(decoded.len(), original.len());
    for (a, b) in original.iter().zip(decoded.iter()) {
        assert!((a - b).abs() <= STEP, "{} decoded as {}", a, b);
    }

    Ok(())
}

#[test]
fn test_encoding_is_deterministic() {
    let frame: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).cos() * 0.7).collect();
    assert_eq!(encode_frame(&frame), encode_frame(&frame));
}

#[test]
fn test_encoded_frame_travels_in_realtime_input() -> Result<()> {
    let frame = vec![0.25f32; 4096];
    let chunk = encode_frame(&frame);

    let json = serde_json::to_value(ClientMessage::audio(&chunk))?;
    assert_eq!(json["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");

    let data = json["realtimeInput"]["audio"]["data"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing audio data"))?;
    let decoded = decode_frame(data)?;
    assert_eq!(decoded.len(), 4096);
    assert!(decoded.iter().all(|s| (s - 0.25).abs() <= STEP));

    Ok(())
}

#[test]
fn test_service_audio_decodes_to_playback_chunk() -> Result<()> {
    // Half a second of speech at 24 kHz
    let speech: Vec<f32> = (0..12000).map(|i| (i as f32 * 0.02).sin() * 0.3).collect();
    let payload = encode_frame(&speech).data;

    let message = format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
        payload
    );
    let events = ServerMessage::parse(message.as_bytes())?.into_events();

    let data = match events.as_slice() {
        [ServerEvent::AudioDelta(data)] => data,
        other => panic!("unexpected events: {:?}", other),
    };

    let chunk = decode_chunk(&decode_base64(data)?, OUTPUT_SAMPLE_RATE, 1)?;
    assert_eq!(chunk.samples.len(), 12000);
    assert!((chunk.duration() - 0.5).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_truncated_service_audio_is_rejected() -> Result<()> {
    let mut bytes = encode_frame(&[0.1; 100]).pcm;
    bytes.pop();

    let result = decode_chunk(&bytes, OUTPUT_SAMPLE_RATE, 1);
    assert_eq!(result, Err(DecodeError::Misaligned { len: 199, width: 2 }));

    Ok(())
}

#[test]
fn test_empty_frame() -> Result<()> {
    let chunk = encode_frame(&[]);
    assert!(chunk.pcm.is_empty());
    assert!(chunk.data.is_empty());
    assert!(decode_frame(&chunk.data)?.is_empty());

    let playback = decode_chunk(&[], OUTPUT_SAMPLE_RATE, 1)?;
    assert_eq!(playback.duration(), 0.0);
    Ok(())
}
