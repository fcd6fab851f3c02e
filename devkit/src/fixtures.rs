/*!
Payloads du tableau de bord iLevel pour les tests

Pages de login et listes de cuves au format renvoyé par le cloud.
*/

use serde_json::Value;

pub const BACKEND_PATH: &str = "ClientView.php";

/// Helper pour créer des payloads formatés comme ceux du cloud iLevel
pub struct IlevelPayloads;

impl IlevelPayloads {
    /// Page de login réussie: globals clientID + backendURL dans un script
    pub fn login_page(client_id: u64, backend_path: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html><head><title>iLevel</title>
<script type="text/javascript">
    var globals = {{}};
    globals.clientID = {client_id};
    globals.backendURL = '{backend_path}';
</script></head>
<body><div id="tanks"></div></body></html>"#
        )
    }

    /// Page renvoyée quand le couple identifiant / mot de passe est refusé
    pub fn invalid_login_page() -> String {
        r#"<html><body><form action="iLevel_login.php" method="post">
<p class="error">Invalid username or password</p>
</form></body></html>"#
            .to_string()
    }

    /// Une cuve telle que renvoyée par gcvt (gallons en texte, comme le cloud)
    pub fn tank(tank_id: u64, description: &str, level: i64) -> Value {
        serde_json::json!({
            "tankID": tank_id,
            "tankDescription": description,
            "gallons": format!("{}", level * 330 / 100),
            "tankCapacity": "330",
            "level": level,
            "inches": level as f64 * 0.45,
            "lastReading": "2024-01-15 06:00:00"
        })
    }

    /// Variante avec des quantités numériques
    pub fn numeric_tank(tank_id: u64, description: &str, level: i64, gallons: f64, capacity: u64) -> Value {
        serde_json::json!({
            "tankID": tank_id,
            "tankDescription": description,
            "gallons": gallons,
            "tankCapacity": capacity,
            "level": level,
            "inches": 12
        })
    }

    pub fn tank_list(tanks: &[Value]) -> String {
        Value::Array(tanks.to_vec()).to_string()
    }
}
