//! Prompt style catalog and rule-based prompt enhancement.

use serde::Serialize;

/// A named prompt template. `{prompt}` marks where the user prompt is
/// substituted; the negative prompt is concatenated with the user's.
#[derive(Debug, Clone, Serialize)]
pub struct Style {
    pub name: &'static str,
    prompt: &'static str,
    negative_prompt: &'static str,
}

pub struct StyleCatalog {
    styles: Vec<Style>,
}

impl StyleCatalog {
    pub fn new() -> Self {
        Self {
            styles: vec![
                Style {
                    name: "Fooocus V2",
                    prompt: "(masterpiece), (best quality), (ultra-detailed), {prompt}, illustration, disheveled hair, detailed eyes, perfect composition, moist skin, intricate details, earrings",
                    negative_prompt: "longbody, lowres, bad anatomy, bad hands, missing fingers, pubic hair, extra digit, fewer digits, cropped, worst quality, low quality",
                },
                Style {
                    name: "Fooocus Cinematic",
                    prompt: "cinematic still {prompt} . emotional, harmonious, vignette, highly detailed, high budget, bokeh, cinemascope, moody, epic, gorgeous, film grain, grainy",
                    negative_prompt: "anime, cartoon, graphic, text, painting, crayon, graphite, abstract, glitch, deformed, mutated, ugly, disfigured",
                },
                Style {
                    name: "Fooocus Photograph",
                    prompt: "photograph {prompt}, 50mm . cinematic 4k epic detailed 4k epic detailed photograph shot on kodak detailed cinematic hbo dark moody, 35mm photo, grainy, vignette, vintage, Kodachrome, Lomography, stained, highly detailed, found footage",
                    negative_prompt: "bokeh, depth of field, blurry, cropped, regular face, saturated, contrast, deformed iris, deformed pupils, semi-realistic, cgi, 3d, render, sketch, cartoon, drawing, anime, text, out of frame, worst quality, low quality, jpeg artifacts, ugly, duplicate, morbid, mutilated, extra fingers, mutated hands, poorly drawn hands, poorly drawn face, mutation, deformed, bad anatomy, bad proportions, extra limbs, cloned face, disfigured, gross proportions, malformed limbs, missing arms, missing legs, extra arms, extra legs, fused fingers, too many fingers, long neck",
                },
                Style {
                    name: "SAI Anime",
                    prompt: "anime artwork {prompt} . anime style, key visual, vibrant, studio anime, highly detailed",
                    negative_prompt: "photo, deformed, black and white, realism, disfigured, low contrast",
                },
                Style {
                    name: "SAI 3D Model",
                    prompt: "professional 3d model {prompt} . octane render, highly detailed, volumetric, dramatic lighting",
                    negative_prompt: "ugly, deformed, noisy, low poly, blurry, painting",
                },
                Style {
                    name: "MRE Cinematic Dynamic",
                    prompt: "epic cinematic shot of {prompt}, deep depth of field, 35mm crisp, bright colors, volumetric lighting, highly detailed, sharp",
                    negative_prompt: "render, illustration, lowres, bad anatomy, bad hands, text, error, missing fingers, extra digit, fewer digits, cropped, worst quality, low quality, normal quality, jpeg artifacts, signature, watermark, username, blurry",
                },
                Style {
                    name: "None",
                    prompt: "{prompt}",
                    negative_prompt: "",
                },
            ],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.styles.iter().map(|s| s.name).collect()
    }

    /// Expand a user prompt through a named style. Unknown style names
    /// pass the prompt through unchanged.
    pub fn apply(
        &self,
        style_name: &str,
        user_prompt: &str,
        user_negative: &str,
    ) -> (String, String) {
        let Some(style) = self.styles.iter().find(|s| s.name == style_name) else {
            return (user_prompt.to_string(), user_negative.to_string());
        };

        let positive = style.prompt.replace("{prompt}", user_prompt);
        let negative = format!("{}, {}", style.negative_prompt, user_negative)
            .trim_matches(|c: char| c == ',' || c.is_whitespace())
            .to_string();
        (positive, negative)
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

const QUALITY_KEYWORDS: &str = "masterpiece, best quality, highly detailed, professional photography, 8k uhd, sharp focus, perfect lighting";

const PERSON_KEYWORDS: [&str; 7] = [
    "person", "man", "woman", "portrait", "face", "people", "human",
];

/// Rule-based "magic prompt" enhancement: prepend quality keywords and
/// pick a portrait or scene template from the prompt's subject.
pub fn enhance_prompt(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    let is_portrait = PERSON_KEYWORDS.iter().any(|kw| lower.contains(kw));

    if is_portrait {
        format!(
            "{QUALITY_KEYWORDS}, beautiful detailed eyes, detailed face, {prompt}, cinematic lighting, bokeh background"
        )
    } else {
        format!("{QUALITY_KEYWORDS}, {prompt}, vibrant colors, professional composition")
    }
}
