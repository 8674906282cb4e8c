use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

impl Content {
    pub fn from_text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

structstruck::strike! {
    #[structstruck::each[derive(Debug, Serialize)]]
    #[serde(rename_all = "camelCase")]
    pub struct GenerateRequest {
        pub contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content>,
        pub generation_config: pub struct GenerationConfig {
            #![serde(rename_all = "camelCase")]
            pub response_modalities: Vec<String>,
            pub speech_config: pub struct SpeechConfig {
                #![serde(rename_all = "camelCase")]
                pub voice_config: pub struct VoiceConfig {
                    #![serde(rename_all = "camelCase")]
                    pub prebuilt_voice_config: pub struct PrebuiltVoiceConfig {
                        #![serde(rename_all = "camelCase")]
                        pub voice_name: String,
                    },
                },
            },
        },
    }
}

impl GenerateRequest {
    pub fn speech(text: &str, voice: &str, style_prompt: &str) -> Self {
        Self {
            contents: vec![Content::from_text(text)],
            system_instruction: if style_prompt.trim().is_empty() {
                None
            } else {
                Some(Content::from_text(style_prompt))
            },
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
        }
    }
}

structstruck::strike! {
    #[structstruck::each[derive(Debug, Deserialize)]]
    pub struct GenerateResponse {
        #[serde(default)]
        pub candidates: Vec<pub struct Candidate {
            pub content: Option<pub struct CandidateContent {
                #[serde(default)]
                pub parts: Vec<pub struct ResponsePart {
                    #[serde(rename = "inlineData")]
                    pub inline_data: Option<pub struct InlineData {
                        #[serde(rename = "mimeType")]
                        pub mime_type: String,
                        pub data: String,
                    }>,
                }>,
            }>,
        }>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_the_wire_shape() {
        let request = GenerateRequest::speech("Hello there.", "Zephyr", "");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello there.");
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn style_prompt_becomes_system_instruction() {
        let request = GenerateRequest::speech("Hi.", "Kore", "Read slowly and calmly.");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "Read slowly and calmly."
        );
    }

    #[test]
    fn response_parses_the_inline_data_path() {
        let body = r#"{
            "candidates": [{
                "content": {
                    "parts": [{
                        "inlineData": {"mimeType": "audio/L16;rate=24000", "data": "AAAA"}
                    }]
                }
            }]
        }"#;

        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        let inline = response.candidates[0].content.as_ref().unwrap().parts[0]
            .inline_data
            .as_ref()
            .unwrap();
        assert_eq!(inline.mime_type, "audio/L16;rate=24000");
        assert_eq!(inline.data, "AAAA");
    }
}
