//! Built-in transformations written to the default catalog by `init`.

use crate::entity::{Category, PromptFields, PromptMap, CUSTOM_PROMPT_KEY, CUSTOM_SENTINEL};

struct Builtin {
    key: &'static str,
    en_name: &'static str,
    zh_name: &'static str,
    prompt: &'static str,
    icon: &'static str,
    category: Category,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        key: CUSTOM_PROMPT_KEY,
        en_name: "Custom Prompt",
        zh_name: "自定义提示词",
        prompt: CUSTOM_SENTINEL,
        icon: "edit",
        category: Category::Custom,
    },
    Builtin {
        key: "cinematic_light",
        en_name: "Cinematic Lighting",
        zh_name: "电影光效",
        prompt: "Add a dramatic, cinematic lighting effect.",
        icon: "movie",
        category: Category::Lighting,
    },
    Builtin {
        key: "watercolor",
        en_name: "Watercolor",
        zh_name: "水彩画",
        prompt: "Turn the image into a watercolor painting.",
        icon: "palette",
        category: Category::Style,
    },
    Builtin {
        key: "vintage_70s",
        en_name: "70s Vintage",
        zh_name: "七十年代复古",
        prompt: "Make it look like a vintage photograph from the 1970s.",
        icon: "local_movies",
        category: Category::Style,
    },
    Builtin {
        key: "wildflowers",
        en_name: "Wildflowers",
        zh_name: "野花",
        prompt: "Add a field of vibrant wildflowers in the foreground.",
        icon: "local_florist",
        category: Category::Elements,
    },
    Builtin {
        key: "winter_scene",
        en_name: "Winter Scene",
        zh_name: "冬日雪景",
        prompt: "Change the season to a snowy winter landscape.",
        icon: "ac_unit",
        category: Category::Scene,
    },
    Builtin {
        key: "cyberpunk",
        en_name: "Cyberpunk",
        zh_name: "赛博朋克",
        prompt: "Transform the scene into a futuristic cyberpunk city.",
        icon: "robot_2",
        category: Category::Scene,
    },
    Builtin {
        key: "charcoal_sketch",
        en_name: "Charcoal Sketch",
        zh_name: "炭笔素描",
        prompt: "Make the subject look like a hand-drawn charcoal sketch.",
        icon: "draw",
        category: Category::Style,
    },
    Builtin {
        key: "dragon_in_sky",
        en_name: "Dragon in the Sky",
        zh_name: "空中巨龙",
        prompt: "Add a majestic dragon flying in the sky.",
        icon: "pets",
        category: Category::Elements,
    },
    Builtin {
        key: "film_noir",
        en_name: "Film Noir",
        zh_name: "黑色电影",
        prompt: "Convert the image to a black and white film noir style.",
        icon: "photo_camera",
        category: Category::Style,
    },
    Builtin {
        key: "magical_aura",
        en_name: "Magical Aura",
        zh_name: "魔法光环",
        prompt: "Surround the subject with a magical, glowing aura.",
        icon: "auto_awesome",
        category: Category::Special,
    },
    Builtin {
        key: "golden_hour",
        en_name: "Golden Hour",
        zh_name: "黄金时刻",
        prompt: "Change the time of day to a beautiful golden hour sunset.",
        icon: "wb_sunny",
        category: Category::Lighting,
    },
    Builtin {
        key: "pixel_art",
        en_name: "16-bit Pixel Art",
        zh_name: "16 位像素风",
        prompt: "Make it a pixel art scene from a 16-bit video game.",
        icon: "grid_on",
        category: Category::Style,
    },
    Builtin {
        key: "tokyo_night",
        en_name: "Tokyo Night",
        zh_name: "东京夜景",
        prompt: "Turn the background into a bustling Tokyo street at night.",
        icon: "nightlife",
        category: Category::Scene,
    },
    Builtin {
        key: "rainy_day",
        en_name: "Rainy Day",
        zh_name: "雨天",
        prompt: "Add a gentle rain effect with glistening droplets.",
        icon: "water_drop",
        category: Category::Elements,
    },
    Builtin {
        key: "lens_flare",
        en_name: "Lens Flare",
        zh_name: "镜头光晕",
        prompt: "Add a dramatic lens flare effect.",
        icon: "flare",
        category: Category::Lighting,
    },
    Builtin {
        key: "snow_globe",
        en_name: "Snow Globe",
        zh_name: "水晶球",
        prompt: "Place the scene inside a crystal snow globe.",
        icon: "ac_unit",
        category: Category::Special,
    },
];

/// The built-in catalog. Prompts are English in every locale.
pub fn default_catalog() -> PromptMap {
    BUILTINS
        .iter()
        .map(|b| {
            let mut fields = PromptFields {
                icon: Some(b.icon.to_string()),
                category: Some(b.category),
                ..Default::default()
            };
            fields.set_name("en", b.en_name);
            fields.set_name("zh", b.zh_name);
            fields.set_prompt("en", b.prompt);
            fields.set_prompt("zh", b.prompt);
            (b.key.to_string(), fields)
        })
        .collect()
}
