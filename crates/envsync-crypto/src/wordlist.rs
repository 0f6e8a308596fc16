//! Recovery phrase word list. Frozen: phrases generated by earlier releases
//! must keep resolving to the same words.

pub const WORD_LIST: &[&str] = &[
    "amber", "angle", "apple", "artist", "atom", "badge", "balance", "beam", "berry", "bird",
    "breeze", "brick", "cable", "cactus", "candle", "canvas", "carbon", "cedar", "charm", "circle",
    "cloud", "cobalt", "comet", "copper", "coral", "crystal", "delta", "drift", "eagle", "echo",
    "ember", "field", "flame", "forest", "fossil", "frost", "galaxy", "garden", "glacier", "gold",
    "granite", "harbor", "hazel", "horizon", "island", "jade", "jungle", "keystone", "lagoon",
    "lantern", "leaf", "lilac", "lunar", "maple", "marble", "meadow", "mercury", "meteor", "mist",
    "mountain", "nebula", "nectar", "oasis", "ocean", "onyx", "orchid", "pearl", "pepper",
    "phoenix", "pine", "planet", "plume", "polar", "prairie", "quartz", "raven", "river", "rocket",
    "sable", "saffron", "sage", "sand", "scarlet", "shadow", "silver", "solar", "spark", "spice",
    "spring", "stone", "storm", "summit", "sunrise", "teal", "thunder", "timber", "topaz",
    "valley", "velvet", "violet", "wave", "willow", "winter", "zephyr",
];
