use crate::plugins::IconImage;
use anyhow::Result;
use tray_icon::Icon;

/// Convert a plugin icon, optionally marked with the notification dot.
pub fn render(image: &IconImage, with_dot: bool) -> Result<Icon> {
    let mut data = image.rgba().to_vec();
    if with_dot {
        add_notification_dot(&mut data, image.width(), image.height());
    }
    Ok(Icon::from_rgba(data, image.width(), image.height())?)
}

/// Orange dot in the top right corner, sized to the icon.
fn add_notification_dot(data: &mut [u8], width: u32, height: u32) {
    let dot_radius = (width.min(height) / 8).max(1) as i32;
    let dot_center_x = width as i32 - dot_radius - 2;
    let dot_center_y = dot_radius + 2;

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let dx = x - dot_center_x;
            let dy = y - dot_center_y;

            if dx * dx + dy * dy <= dot_radius * dot_radius {
                let idx = ((y as u32 * width + x as u32) * 4) as usize;
                data[idx..idx + 4].copy_from_slice(&[230, 150, 0, 255]);
            }
        }
    }
}
