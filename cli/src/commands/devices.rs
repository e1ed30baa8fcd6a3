use colored::*;
use latprobe_common::config::ANY_DEVICE;
use latprobe_core::network::{list_devices, resolve_device};

use crate::terminal::format::Detail;
use crate::terminal::{colors, print};

pub fn devices() -> anyhow::Result<()> {
    print::header("capture devices");

    for (idx, intf) in list_devices().iter().enumerate() {
        print::tree_head(idx, &intf.name);
        let mut details: Vec<Detail> = intf
            .ips
            .iter()
            .map(|ip| ("Address".to_string(), ip.to_string().color(colors::IPV4_ADDR)))
            .collect();
        let state = if intf.is_up() { "up".green() } else { "down".red() };
        details.push(("State".to_string(), state));
        if let Some(mac) = intf.mac {
            details.push(("MAC".to_string(), mac.to_string().normal()));
        }
        print::as_tree_one_level(&details);
    }

    match resolve_device(ANY_DEVICE) {
        Ok(device) => print::aligned_line("Wildcard", device.name().to_string().green()),
        Err(e) => print::aligned_line("Wildcard", e.to_string().red()),
    }
    print::end_of_program();
    Ok(())
}
