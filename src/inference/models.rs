//! Known image models and their input requirements.

/// Step count and guidance used when a request does not override them
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingDefaults {
    pub steps: u32,
    pub guidance: f32,
}

/// Text-only models
pub const TEXT_DEFAULTS: SamplingDefaults = SamplingDefaults {
    steps: 30,
    guidance: 8.0,
};

/// Image-conditioned models run longer with a looser guidance scale
pub const CONDITIONED_DEFAULTS: SamplingDefaults = SamplingDefaults {
    steps: 50,
    guidance: 7.5,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conditioning {
    TextOnly,
    Image,
    /// image required, mask optional
    ImageAndMask,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub id: String,
    pub conditioning: Conditioning,
}

struct KnownModel {
    id: &'static str,
    aliases: &'static [&'static str],
    conditioning: Conditioning,
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        id: "@cf/runwayml/stable-diffusion-v1-5-img2img",
        aliases: &["img2img"],
        conditioning: Conditioning::Image,
    },
    KnownModel {
        id: "@cf/runwayml/stable-diffusion-v1-5-inpainting",
        aliases: &["inpainting"],
        conditioning: Conditioning::ImageAndMask,
    },
    KnownModel {
        id: "@cf/stabilityai/stable-diffusion-v1-5-inpainting",
        aliases: &[],
        conditioning: Conditioning::ImageAndMask,
    },
    KnownModel {
        id: "@cf/black-forest-labs/flux-1-schnell",
        aliases: &["flux"],
        conditioning: Conditioning::TextOnly,
    },
    KnownModel {
        id: "@cf/stabilityai/stable-diffusion-xl-base-1.0",
        aliases: &["sdxl"],
        conditioning: Conditioning::TextOnly,
    },
    KnownModel {
        id: "@cf/bytedance/stable-diffusion-xl-lightning",
        aliases: &[],
        conditioning: Conditioning::TextOnly,
    },
    KnownModel {
        id: "@cf/lykon/dreamshaper-8-lcm",
        aliases: &[],
        conditioning: Conditioning::TextOnly,
    },
];

impl ModelSpec {
    /// Resolve an id or alias. Unknown ids pass through as text-only.
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        KNOWN_MODELS
            .iter()
            .find(|m| m.id == name || m.aliases.contains(&name))
            .map(|m| Self {
                id: m.id.to_string(),
                conditioning: m.conditioning,
            })
            .unwrap_or_else(|| Self {
                id: name.to_string(),
                conditioning: Conditioning::TextOnly,
            })
    }

    pub fn requires_image(&self) -> bool {
        !matches!(self.conditioning, Conditioning::TextOnly)
    }

    pub fn accepts_mask(&self) -> bool {
        matches!(self.conditioning, Conditioning::ImageAndMask)
    }

    pub fn defaults(&self) -> SamplingDefaults {
        if self.requires_image() {
            CONDITIONED_DEFAULTS
        } else {
            TEXT_DEFAULTS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_full_ids() {
        let spec = ModelSpec::resolve("img2img");
        assert_eq!(spec.id, "@cf/runwayml/stable-diffusion-v1-5-img2img");
        assert!(spec.requires_image());
        assert!(!spec.accepts_mask());

        let spec = ModelSpec::resolve("inpainting");
        assert!(spec.requires_image());
        assert!(spec.accepts_mask());
    }

    #[test]
    fn unknown_models_are_text_only() {
        let spec = ModelSpec::resolve("@cf/someone/new-model");
        assert_eq!(spec.id, "@cf/someone/new-model");
        assert_eq!(spec.conditioning, Conditioning::TextOnly);
    }

    #[test]
    fn conditioned_models_run_more_steps_with_lower_guidance() {
        let text = ModelSpec::resolve("flux").defaults();
        let image = ModelSpec::resolve("img2img").defaults();
        assert!(image.steps > text.steps);
        assert!(image.guidance < text.guidance);
        assert_eq!(text, TEXT_DEFAULTS);
        assert_eq!(image, CONDITIONED_DEFAULTS);
    }
}
