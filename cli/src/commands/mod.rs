mod catalog;
mod helpers;
mod profile;
mod week;

pub(crate) use catalog::cmd_catalog_import;
pub(crate) use profile::{cmd_family_add, cmd_profile_set, cmd_profile_show};
pub(crate) use week::{cmd_week_generate, cmd_week_show};
