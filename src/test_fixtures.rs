//! Generated input files for unit tests, so we don't need binary fixtures.

use std::fs::File;

use tiff::encoder::{TiffEncoder, colortype};

use crate::prelude::*;

/// Write a grayscale TIFF with `pages` pages. Each page is a different shade,
/// so the pages are distinguishable after decoding.
pub fn write_tiff(path: &Path, pages: usize) -> Result<()> {
    let (width, height) = (16, 8);
    let mut file = File::create(path)?;
    let mut encoder = TiffEncoder::new(&mut file)?;
    for page in 0..pages {
        let shade = u8::try_from(page * 40 % 256)?;
        let data = vec![shade; (width * height) as usize];
        encoder.write_image::<colortype::Gray8>(width, height, &data)?;
    }
    Ok(())
}

/// Write a minimal PDF with one page per entry in `texts`.
pub fn write_pdf(path: &Path, texts: &[&str]) -> Result<()> {
    let page_count = texts.len();
    // Objects: 1 = catalog, 2 = pages, 3 = font, then a page and a content
    // stream for each page.
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            (0..page_count)
                .map(|i| format!("{} 0 R", 4 + 2 * i))
                .collect::<Vec<_>>()
                .join(" "),
            page_count
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_owned(),
    ];
    for (i, text) in texts.iter().enumerate() {
        let content = format!("BT /F1 24 Tf 72 720 Td ({}) Tj ET", text);
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            5 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = vec![];
    for (i, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, object));
    }
    let xref_offset = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in offsets {
        pdf.push_str(&format!("{:010} 00000 n \n", offset));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));
    std::fs::write(path, pdf)?;
    Ok(())
}
