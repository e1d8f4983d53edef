//! HTML pages served by the portal.

const HEAD: &str = r#"<!DOCTYPE HTML>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0, minimum-scale=1.0, maximum-scale=1.0, user-scalable=no">
    <title>Checker WiFi Settings</title>
"#;

const FORM_STYLE: &str = r#"    <style>
        tr > td > input, tr > td > select {
            padding: 0;
            width: 100%;
            line-height: 24px;
            border: 1px solid black;
        }
        table {
            width: 92%;
            margin: auto;
            border: 1px solid black;
            border-collapse: collapse;
        }
        td {
            padding: 10px;
            border: 1px solid black;
        }
    </style>
"#;

/// Settings form. Offers a drop-down when networks were scanned, free text
/// otherwise.
pub(crate) fn index(networks: &[String]) -> String {
    let ssid_input = if networks.is_empty() {
        "<input type='text' required maxlength='100' name='ssid'>".to_string()
    } else {
        let options: String = networks
            .iter()
            .map(|ssid| format!("<option>{}</option>", escape_html(ssid)))
            .collect();
        format!("<select name='ssid'>{}</select>", options)
    };

    format!(
        r#"{HEAD}{FORM_STYLE}</head>
<body>
    <h1><center>Checker WiFi Settings</center></h1>
    <form method="POST" action="save">
        <table>
            <tr>
                <td width="24%">SSID</td>
                <td>{ssid_input}</td>
            </tr>
            <tr>
                <td>Password</td>
                <td><input type="password" required minlength="8" maxlength="100" name="password"></td>
            </tr>
            <tr>
                <td colspan='2'><center><input style="width: 50%; font-weight: bold" type="submit" value="Save Data"></center></td>
            </tr>
        </table>
    </form>
</body>
</html>
"#
    )
}

pub(crate) fn saved() -> String {
    format!(
        r#"{HEAD}</head>
<body>
    <center>
        <h1>Checker WiFi Settings</h1>
        <div>Checker WiFi AP settings have been successful.</div>
    </center>
</body>
</html>
"#
    )
}

pub(crate) fn failed() -> String {
    format!(
        r#"{HEAD}</head>
<body>
    <center>
        <h1>FAILED</h1>
    </center>
</body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
