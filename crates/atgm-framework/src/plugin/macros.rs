// ─── Internal helper: PluginMetadata builder ──────────────────────────────────
//
// Used exclusively by `define_plugin!`.  Not part of the public API.

/// Internal helper macro: builds a [`PluginMetadata`] from optional overrides.
///
/// # Internal calling convention
///
/// ```text
/// __plugin_metadata!(
///     @parse [$doc?]      ← captured doc literal
///            key: val, …  ← raw metadata tokens
/// )
/// ```
///
/// [`PluginMetadata`]: crate::plugin::PluginMetadata
#[macro_export]
#[doc(hidden)]
macro_rules! __plugin_metadata {
    // Entry: receives doc comment and raw metadata tokens
    (@parse [$($doc:expr)?] $($meta:tt)*) => {
        $crate::__plugin_metadata!(@pm [$($doc)?] [] [] [$($meta)*])
    };

    // TT-muncher: skip leading comma
    (@pm $doc:tt $ver:tt $dsc:tt [, $($rest:tt)*]) => {
        $crate::__plugin_metadata!(@pm $doc $ver $dsc [$($rest)*])
    };

    // version: "..."
    (@pm $doc:tt [$($old:expr)?] $dsc:tt [version : $v:literal $($rest:tt)*]) => {
        $crate::__plugin_metadata!(@pm $doc [$v] $dsc [$($rest)*])
    };

    // desc: "..."
    (@pm $doc:tt $ver:tt [$($old:expr)?] [desc : $v:literal $($rest:tt)*]) => {
        $crate::__plugin_metadata!(@pm $doc $ver [$v] [$($rest)*])
    };

    // End of tokens → emit
    (@pm $doc:tt $ver:tt $dsc:tt []) => {
        $crate::plugin::PluginMetadata {
            version: $crate::__plugin_metadata!(@get_ver $ver),
            desc:    $crate::__plugin_metadata!(@get_dsc $dsc $doc),
        }
    };

    (@get_ver []) => { ::std::env!("CARGO_PKG_VERSION") };
    (@get_ver [$ver:expr]) => { $ver };

    // explicit > doc comment > crate description
    (@get_dsc [$dsc:expr] $_doc:tt) => { $dsc };
    (@get_dsc [] [$doc:expr]) => { $doc };
    (@get_dsc [] []) => { ::std::env!("CARGO_PKG_DESCRIPTION") };
}

// ─── define_plugin! ──────────────────────────────────────────────────────────

/// Creates a [`PluginDescriptor`], the static `Copy` handle to a plugin.
///
/// # Syntax
///
/// ```rust,ignore
/// use atgm::prelude::*;
///
/// pub static UPLINK: PluginDescriptor = define_plugin! {
///     /// Streams selected fields to a remote broker.
///     name: "uplink",
///
///     // Host capabilities the plugin cannot run without
///     requires: [SerialStream, Timer],
///
///     // Option keys understood by the plugin; others are reported
///     options: ["endpoint", "topic_pfx", "fields"],
///
///     // fn(&PluginConfig) -> Result<impl Plugin, impl Into<BoxError>>
///     create: Uplink::from_config,
///
///     metadata: {
///         version: "2.0.0",
///         desc:    "Short description.",
///     },
/// };
/// ```
///
/// ## Field reference
///
/// | Field | Required | Description |
/// |-------|----------|-------------|
/// | `name` | yes | Must be **first**. Plugin name and configuration key. |
/// | `requires` | no | `[Capability, …]` variant names of [`Capability`] |
/// | `options` | no | `["key", …]` recognised option keys |
/// | `create` | yes | Factory path |
/// | `metadata` | no | `{ version, desc }`; defaults come from the defining crate |
///
/// When `desc` is omitted, a doc comment placed before `name` is used, then
/// the crate description.
///
/// [`PluginDescriptor`]: crate::plugin::PluginDescriptor
/// [`Capability`]: crate::Capability
#[macro_export]
macro_rules! define_plugin {
    // ── Entry: with doc comment ───────────────────────────────────────────────
    ($(#[doc = $doc:literal])+ name: $($tail:tt)+) => {
        $crate::define_plugin!(
            @body [::std::concat!($($doc, " "),*)] name: $($tail)+
        )
    };

    // ── Entry: no doc ─────────────────────────────────────────────────────────
    (name: $($tail:tt)+) => {
        $crate::define_plugin!(@body [] name: $($tail)+)
    };

    // ── Body: emit the PluginDescriptor ───────────────────────────────────────
    (
        @body [$($doc:expr)?]
        name: $name:literal,
        $(requires: [$($cap:ident),* $(,)?],)?
        $(options: [$($opt:literal),* $(,)?],)?
        create: $create:path
        $(, metadata: { $($meta:tt)* })?
        $(,)?
    ) => {{
        const __ATGM_META: $crate::plugin::PluginMetadata =
            $crate::__plugin_metadata!(@parse [$($doc)?] $($($meta)*)?);

        fn __atgm_plugin_create(
            config: &$crate::plugin::PluginConfig,
        ) -> ::std::result::Result<$crate::plugin::BoxedPlugin, $crate::BoxError> {
            let plugin = $create(config)
                .map_err(::std::convert::Into::<$crate::BoxError>::into)?;
            let plugin: $crate::plugin::BoxedPlugin = ::std::boxed::Box::new(plugin);
            ::std::result::Result::Ok(plugin)
        }

        $crate::plugin::PluginDescriptor {
            api_version: $crate::plugin::ATGM_PLUGIN_API_VERSION,
            name:        $name,
            requires:    &[$($($crate::Capability::$cap),*)?],
            options:     &[$($($opt),*)?],
            create:      __atgm_plugin_create,
            metadata:    __ATGM_META,
        }
    }};
}
