use url::Url;

use crate::{config::ShopInfo, models::AppointmentRow, schedule::parse_date};

const WHATSAPP_BASE: &str = "https://wa.me/";

pub fn confirmation_message(shop: &ShopInfo, appointment: &AppointmentRow) -> String {
    let date = parse_date(&appointment.appointment_date)
        .map(|date| date.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|_| appointment.appointment_date.clone());

    format!(
        "Olá {}!\n\
         Seu agendamento foi confirmado para {} às {}.\n\
         Pacote escolhido: {}\n\n\
         Endereço: {}\n\
         Contato: {}\n\n\
         Em caso de imprevistos, por favor nos avise com antecedência.\n\
         Agradecemos a preferência!",
        appointment.client_name,
        date,
        appointment.appointment_time,
        appointment.service_package,
        shop.address,
        shop.contact,
    )
}

/// Link that opens a chat with the client, message pre-filled.
pub fn confirmation_link(shop: &ShopInfo, appointment: &AppointmentRow) -> Result<String, url::ParseError> {
    let number = format!("{}{}", shop.whatsapp_country_code, appointment.client_phone);
    let mut url = Url::parse(WHATSAPP_BASE)?.join(&number)?;
    url.query_pairs_mut()
        .append_pair("text", &confirmation_message(shop, appointment));
    Ok(url.to_string())
}
