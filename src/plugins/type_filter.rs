use super::contract::CONTRACT_INTERFACE;
use super::module::{PluginType, Visibility};

/// Keep the types the host can instantiate as plugins.
pub fn plugin_types(types: Vec<PluginType>) -> Vec<PluginType> {
    types.into_iter().filter(is_plugin_type).collect()
}

fn is_plugin_type(ty: &PluginType) -> bool {
    ty.visibility == Visibility::Public
        && !ty.is_abstract
        && ty.constructor.is_some()
        && ty.implements(CONTRACT_INTERFACE)
}
