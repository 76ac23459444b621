/// System prompt applied when the caller does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Kimi, a helpful AI assistant.";

/// User prompt substituted when the chat `message` field is empty or absent.
pub const DEFAULT_USER_PROMPT: &str = "Hello! My name is Li Lei. What does 1 + 1 equal?";

/// Resolved analysis prompt plus whether it came from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPrompt {
    pub text: String,
    pub custom: bool,
}

/// Picks the prompt for a multi-image analysis request.
///
/// A non-blank `custom_prompt` always wins; otherwise the preset template
/// for `analysis_type` is used, falling back to the generic template for
/// unknown types.
pub fn analysis_prompt(
    analysis_type: &str,
    image_count: usize,
    custom_prompt: Option<&str>,
) -> AnalysisPrompt {
    if let Some(custom) = custom_prompt.map(str::trim).filter(|text| !text.is_empty()) {
        return AnalysisPrompt {
            text: custom.to_string(),
            custom: true,
        };
    }

    let text = match analysis_type {
        "relationship" => format!(
            "I have uploaded {image_count} images. Carefully analyze how these images relate \
             to each other, covering:\n\
             1. What they have in common and where they differ\n\
             2. Whether they form a temporal sequence\n\
             3. Spatial relationships between them\n\
             4. Thematic or conceptual links\n\
             5. Similarities or differences in visual style\n\
             Give a detailed analysis."
        ),
        "comparison" => format!(
            "Compare these {image_count} images, focusing on:\n\
             1. Differences in content\n\
             2. Quality and sharpness\n\
             3. Composition and viewpoint\n\
             4. Color and lighting\n\
             5. Which image suits which purpose best"
        ),
        "sequence" => format!(
            "Determine whether these {image_count} images form a sequence or storyline:\n\
             1. Chronological order\n\
             2. How events unfold\n\
             3. State changes over time\n\
             4. Movement through space\n\
             5. The best ordering, if any"
        ),
        _ => format!(
            "Analyze these {image_count} images: describe their content and how they relate \
             to each other."
        ),
    };
    AnalysisPrompt {
        text,
        custom: false,
    }
}
