//! Wire messages of the Gemini Live `BidiGenerateContent` protocol
//!
//! Only the subset the coaching session uses is modelled. Unknown server
//! fields are ignored so protocol additions do not break parsing.

use serde::{Deserialize, Serialize};

use crate::audio::codec::EncodedAudioChunk;

/// Response modality requested from the model
pub const AUDIO_MODALITY: &str = "AUDIO";

// =============================================================================
// Client -> server
// =============================================================================

/// Top-level client message (externally tagged: `{"setup": {...}}`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model resource name, e.g. `models/gemini-...`
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Enables transcription; the service takes an empty object
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

// =============================================================================
// Shared
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Inline binary payload (base64 text)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

// =============================================================================
// Server -> client
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// What the session reacts to, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Base64 PCM16 at 24 kHz
    AudioDelta(String),
    /// The user barged in over the model's response
    Interrupted,
    TurnComplete,
    InputTranscript(String),
    OutputTranscript(String),
    /// The service will close the connection soon
    GoAway { time_left: Option<String> },
    /// Graceful close
    Closed { reason: String },
    /// Transport failure
    TransportError(String),
}

/// What the session sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Audio(EncodedAudioChunk),
    Text(String),
    Close,
}

/// Prefix bare model names with `models/`
pub fn model_resource(name: &str) -> String {
    if name.starts_with("models/") {
        name.to_string()
    } else {
        format!("models/{}", name)
    }
}

impl ClientMessage {
    pub fn setup(
        model: &str,
        voice: &str,
        system_instruction: Option<&str>,
        transcribe: bool,
    ) -> Self {
        let system_instruction = system_instruction
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            });

        let transcription = transcribe.then(AudioTranscriptionConfig::default);

        ClientMessage::Setup(Setup {
            model: model_resource(model),
            generation_config: GenerationConfig {
                response_modalities: vec![AUDIO_MODALITY.to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction,
            input_audio_transcription: transcription.clone(),
            output_audio_transcription: transcription,
        })
    }

    pub fn audio(chunk: &EncodedAudioChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: chunk.mime_type(),
                data: chunk.data.clone(),
            },
        })
    }

    pub fn text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }

    /// Wire message for an outbound item; `Close` has none
    pub fn from_outbound(outbound: &Outbound) -> Option<Self> {
        match outbound {
            Outbound::Audio(chunk) => Some(Self::audio(chunk)),
            Outbound::Text(text) => Some(Self::text(text)),
            Outbound::Close => None,
        }
    }
}

impl ServerMessage {
    /// Parse a text or binary frame payload
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into events, preserving the order they should be handled in
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if let Some(content) = self.server_content {
            if let Some(text) = content.input_transcription.and_then(|t| t.text) {
                if !text.is_empty() {
                    events.push(ServerEvent::InputTranscript(text));
                }
            }

            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        if !blob.data.is_empty() {
                            events.push(ServerEvent::AudioDelta(blob.data));
                        }
                    }
                }
            }

            if let Some(text) = content.output_transcription.and_then(|t| t.text) {
                if !text.is_empty() {
                    events.push(ServerEvent::OutputTranscript(text));
                }
            }

            // Also stops the audio carried by this same message
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }

            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_frame;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup("gemini-live", "Zephyr", Some("Be an interviewer"), false);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["setup"]["model"], "models/gemini-live");
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            value["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be an interviewer"
        );
        assert!(value["setup"].get("inputAudioTranscription").is_none());
    }

    #[test]
    fn test_setup_with_transcription() {
        let msg = ClientMessage::setup("models/x", "Puck", None, true);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["setup"]["model"], "models/x");
        assert_eq!(value["setup"]["inputAudioTranscription"], json!({}));
        assert_eq!(value["setup"]["outputAudioTranscription"], json!({}));
        assert!(value["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_audio_and_text_serialization() {
        let chunk = encode_frame(&[0.0, 0.5]);
        let value = serde_json::to_value(ClientMessage::audio(&chunk)).unwrap();
        assert_eq!(value["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(value["realtimeInput"]["audio"]["data"], chunk.data);

        let value = serde_json::to_value(ClientMessage::text("hello")).unwrap();
        assert_eq!(value["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(value["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["clientContent"]["turnComplete"], true);
    }

    #[test]
    fn test_parse_audio_delta() {
        let payload = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQAB" } }
                    ]
                }
            }
        });

        let msg = ServerMessage::parse(payload.to_string().as_bytes()).unwrap();
        assert!(!msg.is_setup_complete());
        assert_eq!(
            msg.into_events(),
            vec![
                ServerEvent::AudioDelta("AAAA".to_string()),
                ServerEvent::AudioDelta("AQAB".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_interrupted_and_turn_complete() {
        let msg = ServerMessage::parse(br#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(msg.into_events(), vec![ServerEvent::Interrupted]);

        let msg = ServerMessage::parse(
            br#"{"serverContent":{"outputTranscription":{"text":"Hi"},"turnComplete":true}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.into_events(),
            vec![
                ServerEvent::OutputTranscript("Hi".to_string()),
                ServerEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn test_interrupted_follows_audio_in_same_message() {
        let payload = json!({
            "serverContent": {
                "interrupted": true,
                "modelTurn": { "parts": [{ "inlineData": { "data": "AAAA" } }] },
                "outputTranscription": { "text": "So tell" }
            }
        });

        let msg = ServerMessage::parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(
            msg.into_events(),
            vec![
                ServerEvent::AudioDelta("AAAA".to_string()),
                ServerEvent::OutputTranscript("So tell".to_string()),
                ServerEvent::Interrupted,
            ]
        );
    }

    #[test]
    fn test_parse_setup_complete_and_unknown_fields() {
        let msg = ServerMessage::parse(br#"{"setupComplete":{},"usageMetadata":{"x":1}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_parse_go_away() {
        let msg = ServerMessage::parse(br#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(
            msg.into_events(),
            vec![ServerEvent::GoAway {
                time_left: Some("10s".to_string())
            }]
        );
    }
}
