// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gemini image generation wired into the session store.
//!
//! One generation call spans a provider request plus several session
//! mutations: the prompt and result are journaled as structured content
//! blocks, the binary lands in the image map, and the provider's raw model
//! message is appended to the generation history so follow-up prompts can
//! replay it.

use anyhow::Context;

use tern_config::ModelSpec;
use tern_model::{ContentBlock, GeminiProvider, Message};
use tern_session::{ids, AssetKind, ImageRecord, Session};

/// Generate an image and persist every artifact into `session`.
/// Returns the new image id.
pub async fn generate_image_into_session(
    spec: &ModelSpec,
    session: &mut Session,
    prompt: &str,
    reference_image_ids: &[String],
) -> anyhow::Result<String> {
    let mut references: Vec<(String, String)> = Vec::with_capacity(reference_image_ids.len());
    for id in reference_image_ids {
        let record = session
            .image(id)
            .with_context(|| format!("reference image not found: {id}"))?;
        references.push((record.mime_type.clone(), record.data_b64.clone()));
    }

    let provider = GeminiProvider::new(spec.clone());
    let generated = provider.generate_image(prompt, &references).await?;

    let image_id = ids::new_id();
    session.add_image(ImageRecord {
        id: image_id.clone(),
        kind: AssetKind::Generated,
        mime_type: generated.mime_type,
        data_b64: generated.data_b64,
        created_at: chrono::Utc::now(),
        provider: Some("gemini".into()),
        prompt: Some(prompt.to_string()),
        reference_images: reference_image_ids.to_vec(),
        raw_model_message: Some(generated.raw_model_message.clone()),
    })?;

    session
        .data
        .gemini_image_history
        .push(generated.raw_model_message);

    session.add_message(Message::user_block(ContentBlock::ImagePrompt {
        prompt: prompt.to_string(),
        images: vec![image_id.clone()],
        reference_image_ids: reference_image_ids.to_vec(),
    }))?;
    session.add_message(Message::assistant_block(ContentBlock::Image {
        id: image_id.clone(),
        reference_images: reference_image_ids.to_vec(),
    }))?;

    Ok(image_id)
}
