// Discord commands module.
// Feature-specific commands live next to their feature (see `protection`).

pub mod presence;
