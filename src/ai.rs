use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    AudioResponseFormat, ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, CreateTranscriptionRequestArgs, ImageUrlArgs, ResponseFormat,
};
use async_openai::Client;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::config::OpenAiSettings;
use crate::store::{Transcript, TranscriptSegment};

/// Thin wrapper over the OpenAI client carrying the model settings.
pub(crate) struct OpenAi {
    client: Client<OpenAIConfig>,
    settings: OpenAiSettings,
}

impl OpenAi {
    pub(crate) fn new(settings: &OpenAiSettings) -> Self {
        let client = match &settings.api_key {
            Some(key) => Client::with_config(OpenAIConfig::new().with_api_key(key)),
            None => Client::new(),
        };
        Self {
            client,
            settings: settings.clone(),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    /// Asks the vision model about one or more frames given as data URLs.
    pub(crate) async fn annotate_frames(
        &self,
        prompt: &str,
        frames: Vec<String>,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.vision_model)
            .max_tokens(max_tokens)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        [
                            vec![ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartTextArgs::default()
                                    .text(prompt)
                                    .build()?,
                            )],
                            frames
                                .into_iter()
                                .map(|frame| -> Result<_, OpenAIError> {
                                    Ok(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                        ChatCompletionRequestMessageContentPartImageArgs::default()
                                            .image_url(ImageUrlArgs::default().url(frame).build()?)
                                            .build()?,
                                    ))
                                })
                                .collect::<Result<_, _>>()?,
                        ]
                        .concat(),
                    ))
                    .build()?,
            )])
            .build()?;

        let response = timeout(self.deadline(), self.client.chat().create(request)).await??;
        first_content(response)
    }

    /// Chat completion in JSON mode; returns the raw reply text.
    pub(crate) async fn complete_json(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.chat_model)
            .max_tokens(self.settings.max_tokens)
            .temperature(self.settings.temperature)
            .response_format(ResponseFormat::JsonObject)
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(system)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(prompt)
                        .build()?,
                ),
            ])
            .build()?;

        debug!(model = %self.settings.chat_model, prompt_len = prompt.len(), "sending ranking request");
        let response = timeout(self.deadline(), self.client.chat().create(request)).await??;
        first_content(response)
    }

    pub(crate) async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<Transcript> {
        let mut args = CreateTranscriptionRequestArgs::default();
        args.file(audio_path)
            .model(&self.settings.transcription_model)
            .response_format(AudioResponseFormat::VerboseJson);
        if let Some(language) = &self.settings.language {
            args.language(language);
        }
        let request = args.build()?;

        let response = timeout(
            self.deadline(),
            self.client.audio().transcribe_verbose_json(request),
        )
        .await??;

        Ok(Transcript {
            text: response.text,
            language: Some(response.language),
            duration: Some(f64::from(response.duration)),
            segments: response
                .segments
                .unwrap_or_default()
                .into_iter()
                .map(|segment| TranscriptSegment {
                    id: i64::from(segment.id),
                    start: f64::from(segment.start),
                    end: f64::from(segment.end),
                    text: segment.text,
                })
                .collect(),
        })
    }
}

fn first_content(response: CreateChatCompletionResponse) -> anyhow::Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(anyhow::anyhow!("No content in response from OpenAI"))
}
