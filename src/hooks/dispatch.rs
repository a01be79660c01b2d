use flowdeck_plugin::{AppContext, HookRegistration, Placement, hook::point_name};
use tracing::warn;

use super::registry::HookRegistry;

/// Registrations relevant to one slot, split by placement.
#[derive(Debug, Default, Clone)]
pub struct DispatchPlan {
    pub before: Vec<HookRegistration>,
    pub replace: Vec<HookRegistration>,
    pub after: Vec<HookRegistration>,
}

impl DispatchPlan {
    /// Gathers the bare `slot` bucket plus `slot:before`, `slot:after` and
    /// `slot:replace`, ordered by priority and then registration order
    /// across all buckets. Each registration lands in the group named by its
    /// own placement.
    pub fn collect(registry: &HookRegistry, slot: &str) -> Self {
        let mut all = registry.get(slot);
        for placement in [Placement::Before, Placement::Replace, Placement::After] {
            all.extend(registry.get(&point_name(slot, placement)));
        }
        all.sort_by_key(|r| (r.priority, r.seq));

        let mut plan = DispatchPlan::default();
        for registration in all {
            match registration.placement {
                Placement::Before => plan.before.push(registration),
                Placement::Replace => plan.replace.push(registration),
                Placement::After => plan.after.push(registration),
            }
        }
        plan
    }

    pub fn replaces_default(&self) -> bool {
        !self.replace.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.replace.is_empty() && self.after.is_empty()
    }
}

/// Renders a slot: `before` entries, then either the `replace` entries or the
/// default content, then `after` entries. A default of `None` renders nothing.
pub fn render_slot<'a, F>(
    registry: &HookRegistry,
    slot: &str,
    ctx: &mut AppContext<'a>,
    default: F,
) -> Vec<String>
where
    F: FnOnce(&mut AppContext<'a>) -> Option<String>,
{
    let plan = DispatchPlan::collect(registry, slot);
    let mut out = render_each(&plan.before, ctx);
    if plan.replaces_default() {
        out.extend(render_each(&plan.replace, ctx));
    } else if let Some(content) = default(ctx) {
        out.push(content);
    }
    out.extend(render_each(&plan.after, ctx));
    out
}

/// Renders a panel point. Panels have no default content, so every
/// registration renders in priority order whatever its placement.
pub fn render_panel(registry: &HookRegistry, point: &str, ctx: &mut AppContext<'_>) -> Vec<String> {
    render_each(&registry.get(point), ctx)
}

fn render_each(registrations: &[HookRegistration], ctx: &mut AppContext<'_>) -> Vec<String> {
    registrations
        .iter()
        .filter_map(|r| match r.implementation.render(ctx) {
            Ok(fragment) => Some(fragment),
            Err(e) => {
                warn!(point = %r.point_name, owner = %r.owner_key, %e, "hook failed to render, skipped");
                None
            }
        })
        .collect()
}
