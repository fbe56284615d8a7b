mod bulk;
mod helpers;
mod history;
mod ingredient;
mod list;
mod recipe;
mod sector;
mod staple;

pub(crate) use bulk::{BulkKind, cmd_export, cmd_import};
pub(crate) use history::{cmd_history_complete, cmd_history_delete, cmd_history_list};
pub(crate) use ingredient::cmd_ingredient_list;
pub(crate) use list::{
    cmd_list_check, cmd_list_generate, cmd_list_rename, cmd_list_set_all, cmd_list_share,
    cmd_list_show, cmd_list_update,
};
pub(crate) use recipe::{
    cmd_recipe_add, cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_list, cmd_recipe_show,
};
pub(crate) use sector::{
    cmd_sector_add, cmd_sector_delete, cmd_sector_list, cmd_sector_move, cmd_sector_rename,
};
pub(crate) use staple::{cmd_staple_add, cmd_staple_delete, cmd_staple_edit, cmd_staple_list};
