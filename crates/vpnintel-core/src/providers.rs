// # Provider Display Names
//
// Static identifier -> display name table for the providers the upstream
// feed publishes. Read-only process-wide data; unknown identifiers fall back
// to the identifier itself.

const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("airvpn", "AirVPN"),
    ("cyberghost", "CyberGhost"),
    ("expressvpn", "ExpressVPN"),
    ("fastestvpn", "FastestVPN"),
    ("giganews", "Giganews"),
    ("hidemyass", "HideMyAss"),
    ("ipvanish", "IPVanish"),
    ("ivpn", "IVPN"),
    ("mullvad", "Mullvad"),
    ("nordvpn", "NordVPN"),
    ("perfect privacy", "Perfect Privacy"),
    ("privado", "Privado"),
    ("private internet access", "Private Internet Access"),
    ("privatevpn", "PrivateVPN"),
    ("protonvpn", "ProtonVPN"),
    ("purevpn", "PureVPN"),
    ("slickvpn", "SlickVPN"),
    ("surfshark", "Surfshark"),
    ("torguard", "TorGuard"),
    ("vpnsecure", "VPNSecure"),
    ("vpn unlimited", "VPN Unlimited"),
    ("vyprvpn", "VyprVPN"),
    ("wevpn", "WeVPN"),
    ("windscribe", "Windscribe"),
];

/// Resolve the human-readable name of a provider
///
/// # Parameters
///
/// - `name`: Provider identifier as used in the feed (e.g. "nordvpn")
///
/// # Returns
///
/// The display name, or `name` unchanged when the provider is unknown
pub fn display_name(name: &str) -> &str {
    DISPLAY_NAMES
        .iter()
        .find(|(id, _)| *id == name)
        .map(|(_, display)| *display)
        .unwrap_or(name)
}
