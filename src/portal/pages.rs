//! HTML pages served by the captive portal.

/// Escape text for use in HTML element content and quoted attributes.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
        body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif;
               background: #f2f4f7; margin: 0; padding: 20px; }
        .container { max-width: 420px; margin: 40px auto; background: #fff;
                     border-radius: 12px; padding: 28px;
                     box-shadow: 0 4px 16px rgba(0,0,0,0.08); }
        h1 { margin: 0 0 6px; color: #222; font-size: 24px; }
        .subtitle { color: #666; margin: 0 0 24px; }
        label { display: block; margin-bottom: 6px; color: #333; font-weight: 600; }
        select, input { width: 100%; padding: 10px; margin-bottom: 16px;
                        border: 1px solid #ccc; border-radius: 6px;
                        box-sizing: border-box; font-size: 15px; }
        button { width: 100%; padding: 12px; border: 0; border-radius: 6px;
                 background: #2563eb; color: #fff; font-size: 15px;
                 cursor: pointer; margin-bottom: 10px; }
        .secondary { background: #e5e7eb; color: #111; }
        .hidden { display: none; }
        .url { font-family: monospace; background: #f5f5f5; padding: 12px;
               border-radius: 6px; margin: 16px 0; word-break: break-all; }
        .ok { font-size: 48px; color: #16a34a; text-align: center; }
"#;

/// Setup page: network picker and passphrase form.
///
/// The page scans through `/api/scan`, submits to `/api/configure` and moves
/// to `/success?ssid=` when the device reports success.
pub fn setup_page_html(hostname: &str) -> String {
    let hostname = html_escape(hostname);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>WiFi Setup - {hostname}</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="container">
        <h1>WiFi Setup</h1>
        <p class="subtitle">Configure WiFi for {hostname}</p>

        <button class="secondary" onclick="scanNetworks()">Scan for Networks</button>
        <p id="loading" class="hidden">Scanning for networks...</p>

        <form id="wifiForm" onsubmit="submitForm(event)">
            <label for="ssid">WiFi Network</label>
            <select id="ssid" name="ssid" required>
                <option value="">-- Select Network --</option>
            </select>

            <label for="password">Password</label>
            <input type="password" id="password" name="password" placeholder="Enter WiFi password">

            <button type="submit">Connect to WiFi</button>
        </form>
    </div>

    <script>
        async function scanNetworks() {{
            const loading = document.getElementById('loading');
            loading.classList.remove('hidden');
            try {{
                const response = await fetch('/api/scan');
                const networks = await response.json();
                const select = document.getElementById('ssid');
                select.innerHTML = '<option value="">-- Select Network --</option>';
                networks.forEach(net => {{
                    const option = document.createElement('option');
                    option.value = net.ssid;
                    option.textContent = `${{net.ssid}} (${{net.rssi}} dBm)${{net.secure ? '' : ' open'}}`;
                    select.appendChild(option);
                }});
            }} catch (e) {{
                alert('Scan failed: ' + e);
            }}
            loading.classList.add('hidden');
        }}

        async function submitForm(e) {{
            e.preventDefault();
            const ssid = document.getElementById('ssid').value;
            const password = document.getElementById('password').value;
            if (!ssid) {{
                alert('Please select a network');
                return;
            }}
            try {{
                const response = await fetch('/api/configure', {{
                    method: 'POST',
                    headers: {{'Content-Type': 'application/json'}},
                    body: JSON.stringify({{ssid, password}})
                }});
                const result = await response.json();
                if (result.success) {{
                    window.location.href = '/success?ssid=' + encodeURIComponent(ssid);
                }} else {{
                    alert('Configuration failed: ' + result.error);
                }}
            }} catch (e) {{
                alert('Error: ' + e);
            }}
        }}

        scanNetworks();
    </script>
</body>
</html>"#
    )
}

/// Success page pointing the user at `http://<hostname>.local/`.
pub fn success_page_html(hostname: &str, ssid: &str) -> String {
    let hostname = html_escape(hostname);
    let ssid = html_escape(ssid);
    let mdns_url = format!("http://{}.local/", hostname);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>WiFi Configured!</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="container">
        <div class="ok">&#10003;</div>
        <h1>WiFi Configured!</h1>
        <p class="subtitle">Successfully connected to {ssid}</p>

        <p><strong>1.</strong> Switch back to "{ssid}" on this phone or computer.</p>
        <p><strong>2.</strong> Open the device page:</p>

        <div class="url"><a href="{mdns_url}">{mdns_url}</a></div>

        <button onclick="window.location.href='{mdns_url}'">Open Device Page</button>
    </div>
</body>
</html>"#
    )
}
